//! Picking one resource out of a filtered listing.

use crate::error::Error;
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use std::io::{self, BufRead, Write};

/// Tie-break applied when several resources match and no id was given
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Choose {
    /// First in listing order
    First,
    /// Earliest launch time
    Oldest,
    /// Latest launch time
    Newest,
}

/// Something the resolver can pick from.
pub trait Candidate {
    fn id(&self) -> &str;
    fn launched_at(&self) -> Option<DateTime<Utc>>;
    /// One line of the interactive table, without the index
    fn describe_row(&self) -> String;
}

/// Resolve a listing to a single candidate, prompting on stdin if needed.
pub fn resolve<'a, T: Candidate>(
    candidates: &'a [T],
    explicit_id: Option<&str>,
    choose: Option<Choose>,
) -> Result<Option<&'a T>> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    resolve_with(
        candidates,
        explicit_id,
        choose,
        &mut stdin.lock(),
        &mut stdout.lock(),
    )
}

/// Like [`resolve`], with the prompt streams supplied by the caller.
///
/// An `explicit_id` longer than two characters is a resource id and must
/// match exactly. Anything shorter is an ordinal into the listing; an
/// ordinal that is out of range (or not a number) selects nothing.
pub fn resolve_with<'a, T, R, W>(
    candidates: &'a [T],
    explicit_id: Option<&str>,
    choose: Option<Choose>,
    input: &mut R,
    output: &mut W,
) -> Result<Option<&'a T>>
where
    T: Candidate,
    R: BufRead,
    W: Write,
{
    match candidates {
        [] => Err(Error::not_found("resource", "the given criteria").into()),
        [only] => Ok(Some(only)),
        _ => {
            if let Some(id) = explicit_id {
                if id.len() > 2 {
                    return candidates
                        .iter()
                        .find(|c| c.id() == id)
                        .map(Some)
                        .ok_or_else(|| Error::not_found("resource", format!("id {id}")).into());
                }
                return Ok(by_ordinal(candidates, id));
            }
            match choose {
                Some(Choose::First) => Ok(candidates.first()),
                Some(Choose::Oldest) => Ok(extreme_by_launch(candidates, |a, b| a < b)),
                Some(Choose::Newest) => Ok(extreme_by_launch(candidates, |a, b| a > b)),
                None => prompt(candidates, input, output),
            }
        }
    }
}

fn by_ordinal<'a, T>(candidates: &'a [T], ordinal: &str) -> Option<&'a T> {
    ordinal
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|idx| candidates.get(idx))
}

/// Linear scan keeping the first-seen element on ties.
fn extreme_by_launch<T, F>(candidates: &[T], replaces: F) -> Option<&T>
where
    T: Candidate,
    F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
{
    let mut best = candidates.first()?;
    for c in candidates {
        if let (Some(t), Some(best_t)) = (c.launched_at(), best.launched_at()) {
            if replaces(t, best_t) {
                best = c;
            }
        }
    }
    Some(best)
}

fn prompt<'a, T, R, W>(candidates: &'a [T], input: &mut R, output: &mut W) -> Result<Option<&'a T>>
where
    T: Candidate,
    R: BufRead,
    W: Write,
{
    writeln!(
        output,
        "Error, there are multiple instances that match these tags.  Please choose one:"
    )?;
    writeln!(output, "index: private_ip / public_ip / instance_id / launch_time")?;
    for (idx, c) in candidates.iter().enumerate() {
        writeln!(output, "{idx}: {}", c.describe_row())?;
    }
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(by_ordinal(candidates, &answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Fake {
        id: String,
        launched: i64,
    }

    impl Candidate for Fake {
        fn id(&self) -> &str {
            &self.id
        }

        fn launched_at(&self) -> Option<DateTime<Utc>> {
            DateTime::from_timestamp(self.launched, 0)
        }

        fn describe_row(&self) -> String {
            format!("10.0.0.1 /  / {} / {}", self.id, self.launched)
        }
    }

    fn fakes(times: &[i64]) -> Vec<Fake> {
        times
            .iter()
            .enumerate()
            .map(|(i, t)| Fake {
                id: format!("i-{i:04}"),
                launched: *t,
            })
            .collect()
    }

    fn pick<'a>(
        candidates: &'a [Fake],
        id: Option<&str>,
        choose: Option<Choose>,
    ) -> Result<Option<&'a Fake>> {
        resolve_with(candidates, id, choose, &mut Cursor::new(""), &mut Vec::new())
    }

    #[test]
    fn test_empty_is_not_found() {
        let err = pick(&[], Some("i-0000"), Some(Choose::First)).unwrap_err();
        assert!(crate::error::kind_of(&err).unwrap().is_not_found());
    }

    #[test]
    fn test_single_candidate_ignores_criteria() {
        let cs = fakes(&[7]);
        let got = pick(&cs, Some("i-ffff"), Some(Choose::Newest)).unwrap();
        assert_eq!(got.unwrap().id, "i-0000");
    }

    #[test]
    fn test_long_id_must_match_exactly() {
        let cs = fakes(&[1, 2, 3]);
        assert_eq!(pick(&cs, Some("i-0002"), None).unwrap().unwrap().id, "i-0002");

        let err = pick(&cs, Some("i-9999"), Some(Choose::First)).unwrap_err();
        assert!(crate::error::kind_of(&err).unwrap().is_not_found());
    }

    #[test]
    fn test_short_id_is_ordinal() {
        let cs = fakes(&[1, 2, 3]);
        assert_eq!(pick(&cs, Some("1"), None).unwrap().unwrap().id, "i-0001");
        assert_eq!(pick(&cs, Some("0"), None).unwrap().unwrap().id, "i-0000");
        assert!(pick(&cs, Some("3"), None).unwrap().is_none());
        assert!(pick(&cs, Some("x"), Some(Choose::First)).unwrap().is_none());
    }

    #[test]
    fn test_heuristics() {
        let cs = fakes(&[5, 3, 8]);
        assert_eq!(pick(&cs, None, Some(Choose::First)).unwrap().unwrap().launched, 5);
        assert_eq!(pick(&cs, None, Some(Choose::Oldest)).unwrap().unwrap().launched, 3);
        assert_eq!(pick(&cs, None, Some(Choose::Newest)).unwrap().unwrap().launched, 8);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let cs = fakes(&[4, 9, 4, 9]);
        assert_eq!(pick(&cs, None, Some(Choose::Oldest)).unwrap().unwrap().id, "i-0000");
        assert_eq!(pick(&cs, None, Some(Choose::Newest)).unwrap().unwrap().id, "i-0001");
    }

    #[test]
    fn test_interactive_prompt() {
        let cs = fakes(&[1, 2, 3]);
        let mut out = Vec::new();
        let got = resolve_with(&cs, None, None, &mut Cursor::new("2\n"), &mut out).unwrap();
        assert_eq!(got.unwrap().id, "i-0002");

        let table = String::from_utf8(out).unwrap();
        assert!(table.contains("index: private_ip / public_ip / instance_id / launch_time"));
        assert!(table.contains("1: 10.0.0.1 /  / i-0001 / 2"));
    }

    #[test]
    fn test_interactive_out_of_range() {
        let cs = fakes(&[1, 2]);
        let got = resolve_with(&cs, None, None, &mut Cursor::new("5\n"), &mut Vec::new()).unwrap();
        assert!(got.is_none());
    }
}
