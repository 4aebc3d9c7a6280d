//! Emits `foo` on `words` once a second.

use std::process::ExitCode;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rill::Computation;
use rill::Context;
use rill::Metadata;
use rill::computation::Result;
use tracing::debug;

const TIMER: &str = "loop";

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

struct WordSource;

#[async_trait::async_trait]
impl Computation for WordSource {
    async fn init(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        ctx.set_timer(TIMER, now_millis());
        Ok(())
    }

    async fn process_timer(&mut self, ctx: &mut Context<'_>, key: String, time: i64) -> Result<()> {
        debug!(%key, time, "tick");
        ctx.produce_record("words", "foo", "1");
        ctx.set_timer(key, now_millis() + 1000);
        Ok(())
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(Metadata::builder("word-source").output("words").build()?)
    }
}

fn main() -> ExitCode {
    rill::serve_computation(WordSource)
}
