use anyhow::{bail, Context, Result};
use aws_manager::{
    aws::{
        ec2::{filter_by_state, find_instances, Instance},
        instance::{Lifecycle, Transition, RUNNING, STOPPED},
    },
    error::Error,
    select,
    template::{self, InstanceTemplate},
};
use clap::Args;
use shlex::try_join;
use std::{os::unix::process::CommandExt, path::PathBuf, process::Command};
use tracing::info;

use super::Session;

#[derive(Args)]
pub struct InstanceArgs {
    /// Instance id, or the index shown by the interactive prompt
    id: Option<String>,

    /// Only print the ssh command and exit (connect)
    #[arg(long)]
    print: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstanceCmd {
    Start,
    Stop,
    Connect,
    Terminate,
    Status,
    Ip,
}

impl InstanceCmd {
    /// States a candidate must be in to be offered for this command
    fn states(self) -> &'static [&'static str] {
        match self {
            InstanceCmd::Start => &[STOPPED],
            InstanceCmd::Stop | InstanceCmd::Connect => &[RUNNING],
            InstanceCmd::Terminate | InstanceCmd::Status | InstanceCmd::Ip => &[],
        }
    }

    fn removes_capacity(self) -> bool {
        matches!(self, InstanceCmd::Stop | InstanceCmd::Terminate)
    }
}

/// Fail unless at least two of `instances` are running.
fn check_keep_one(instances: &[Instance], criteria: &str) -> Result<()> {
    let running = instances.iter().filter(|i| i.state() == RUNNING).count();
    if running < 2 {
        return Err(Error::precondition(
            format!("instances matching {criteria}"),
            format!("{running} running, refusing to remove the last one"),
        )
        .into());
    }
    Ok(())
}

impl InstanceArgs {
    pub async fn main(self, cmd: InstanceCmd, session: &Session) -> Result<()> {
        let compute = session.region.ec2();
        let elb = session.region.elb();
        let lifecycle = Lifecycle::new(&compute, &elb, session.region.name());
        let wait = !session.globals.no_wait;

        let filter = session.instance_filter(self.id.as_deref())?;
        let matching = find_instances(&compute, &filter).await?;
        if session.globals.keep_one && cmd.removes_capacity() {
            check_keep_one(&matching, &filter.to_string())?;
        }
        let candidates = filter_by_state(matching, cmd.states());
        let Some(instance) =
            select::resolve(&candidates, self.id.as_deref(), session.globals.choose)?
        else {
            bail!("no instance selected");
        };

        match cmd {
            InstanceCmd::Start => report(instance, lifecycle.start(instance, wait).await?),
            InstanceCmd::Stop => report(instance, lifecycle.stop(instance, wait).await?),
            InstanceCmd::Terminate => {
                lifecycle.terminate(instance).await?;
                println!("{}", instance.id());
            }
            InstanceCmd::Status => println!("{}", instance.state()),
            InstanceCmd::Ip => {
                let ip = instance
                    .public_ip()
                    .with_context(|| format!("no public ip address found for {}", instance.id()))?;
                println!("{ip}");
            }
            InstanceCmd::Connect => {
                let target = lifecycle
                    .connect_target(instance, session.settings.default_user.as_deref())
                    .await?;
                if let Some(target) = target {
                    self.connect(&session.settings.ssh_program, &target)?;
                }
            }
        }
        Ok(())
    }

    /// Replace this process with `ssh_program target`.
    fn connect(&self, ssh_program: &str, target: &str) -> Result<()> {
        let mut cmd = shlex::split(ssh_program)
            .filter(|words| !words.is_empty())
            .with_context(|| format!("invalid ssh program {ssh_program:?}"))?;
        cmd.push(target.to_string());

        let line = try_join(cmd.iter().map(|s| s.as_str()))
            .with_context(|| format!("cannot quote ssh command for {target}"))?;
        if self.print {
            println!("{line}");
            return Ok(());
        }
        info!("Connecting: {line}");
        let err = Command::new(&cmd[0]).args(&cmd[1..]).exec();
        Err(err).with_context(|| format!("failed to run {}", cmd[0]))
    }
}

fn report(instance: &Instance, transition: Transition) {
    if transition == Transition::Done {
        println!("{}", instance.id());
    }
}

#[derive(Args)]
pub struct RunInstanceArgs {
    /// Instance template (YAML; `${VAR}` is replaced from the environment)
    template: PathBuf,
}

impl RunInstanceArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let template: InstanceTemplate = template::load(&self.template)?;
        let compute = session.region.ec2();
        let elb = session.region.elb();
        let lifecycle = Lifecycle::new(&compute, &elb, session.region.name());

        let instance = lifecycle
            .run(
                &template,
                session.globals.environment.as_deref(),
                session.globals.purpose.as_deref(),
            )
            .await?;
        println!("{}", instance.id());
        Ok(())
    }
}
