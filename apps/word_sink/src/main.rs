//! Logs every record on `words` and keeps a running count in proxy state.

use std::process::ExitCode;

use anyhow::Context as _;
use rill::Computation;
use rill::Context;
use rill::Metadata;
use rill::Record;
use rill::computation::Result;
use tracing::info;

const SEEN_KEY: &str = "seen";

struct WordSink;

#[async_trait::async_trait]
impl Computation for WordSink {
    async fn process_record(&mut self, ctx: &mut Context<'_>, record: Record) -> Result<()> {
        let raw = ctx.get_state(SEEN_KEY).await?;
        let seen = match raw.as_slice() {
            [] => 0,
            bytes => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .context("stored count is not a number")?,
        };
        let seen = seen + 1;
        ctx.set_state(SEEN_KEY, seen.to_string().as_bytes()).await?;

        info!(
            stream = %record.stream,
            key = %String::from_utf8_lossy(&record.key),
            data = %String::from_utf8_lossy(&record.data),
            seen,
            "record"
        );
        Ok(())
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::builder("word-sink").input("words").build()?)
    }
}

fn main() -> ExitCode {
    rill::serve_computation(WordSink)
}
