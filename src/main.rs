mod cli;

use anyhow::Result;
use aws_manager::{
    aws::AwsRegion,
    config::{AuthConfig, Settings},
};
use clap::{Parser, Subcommand};
use cli::{
    CreateDbArgs, DbArgs, DbCmd, DeleteObjectArgs, GetObjectArgs, Globals, InstanceArgs,
    InstanceCmd, ListBucketArgs, MetricArgs, PutObjectArgs, RunInstanceArgs, Session, SnsArgs,
    WaitForDbArgs,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    globals: Globals,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Start a stopped instance and attach it to its environment
    Start(InstanceArgs),
    /// Detach a running instance from its environment and stop it
    Stop(InstanceArgs),
    /// Open an ssh session to a running instance
    Connect(InstanceArgs),
    /// Detach an instance from its environment and terminate it
    TerminateInstance(InstanceArgs),
    /// Launch and tag an instance from a template
    RunInstance(RunInstanceArgs),
    /// Print an instance's state
    GetInstanceStatus(InstanceArgs),
    /// Print an instance's public ip
    GetInstanceIp(InstanceArgs),
    /// Restore a database from its latest snapshot
    CreateDb(CreateDbArgs),
    /// Delete a database, keeping a final snapshot
    DeleteDb(DbArgs),
    /// Wait for a database to reach a status
    WaitForDb(WaitForDbArgs),
    /// Print a database's status
    GetDbStatus(DbArgs),
    /// Print a database's endpoint address
    GetDbEndpoint(DbArgs),
    /// Delete all but the newest manual snapshots of a database
    PurgeDbSnapshots(DbArgs),
    /// Put one CloudWatch data point
    PutCwMetric(MetricArgs),
    /// Upload a file to a bucket
    PutToBucket(PutObjectArgs),
    /// Download an object to a file
    GetFromBucket(GetObjectArgs),
    /// List keys in a bucket
    ListBucket(ListBucketArgs),
    /// Delete an object from a bucket
    DeleteFromBucket(DeleteObjectArgs),
    /// Publish a notification to an SNS topic
    Sns(SnsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = Settings::load()?;
    let auth = AuthConfig::load(&settings.auth_path())?;
    let region = AwsRegion::connect(cli.globals.region, &auth).await?;
    debug!(?region, "session ready");
    let session = Session {
        globals: cli.globals,
        settings,
        region,
    };
    let session = &session;

    use Commands::*;
    match cli.command {
        Start(args) => args.main(InstanceCmd::Start, session).await,
        Stop(args) => args.main(InstanceCmd::Stop, session).await,
        Connect(args) => args.main(InstanceCmd::Connect, session).await,
        TerminateInstance(args) => args.main(InstanceCmd::Terminate, session).await,
        RunInstance(args) => args.main(session).await,
        GetInstanceStatus(args) => args.main(InstanceCmd::Status, session).await,
        GetInstanceIp(args) => args.main(InstanceCmd::Ip, session).await,
        CreateDb(args) => args.main(session).await,
        DeleteDb(args) => args.main(DbCmd::Delete, session).await,
        WaitForDb(args) => args.main(session).await,
        GetDbStatus(args) => args.main(DbCmd::Status, session).await,
        GetDbEndpoint(args) => args.main(DbCmd::Endpoint, session).await,
        PurgeDbSnapshots(args) => args.main(DbCmd::PurgeSnapshots, session).await,
        PutCwMetric(args) => args.main(session).await,
        PutToBucket(args) => args.main(session).await,
        GetFromBucket(args) => args.main(session).await,
        ListBucket(args) => args.main(session).await,
        DeleteFromBucket(args) => args.main(session).await,
        Sns(args) => args.main(session).await,
    }
}
