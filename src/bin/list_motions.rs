//! list_motions - read-only listing of recorded motion events

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use motion_recorder::{EventStore, MotionEvent, Rect, SqliteEventStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the motion event database.
    #[arg(long, env = "RECORDER_DB_PATH", default_value = "recordings/motions.db")]
    db_path: String,
    /// Print a single event, including its bounding regions.
    #[arg(long)]
    id: Option<u64>,
    /// List the most recent events first.
    #[arg(long)]
    newest_first: bool,
}

#[derive(Serialize)]
struct EventDetail {
    #[serde(flatten)]
    event: MotionEvent,
    regions: Vec<Rect>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = SqliteEventStore::open_read_only(&args.db_path)?;

    if let Some(id) = args.id {
        let detail = EventDetail {
            event: store.get(id)?,
            regions: store.regions(id)?,
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let mut events = store.list()?;
    if args.newest_first {
        events.reverse();
    }
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
