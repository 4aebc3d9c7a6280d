//! # Computation Contract
//!
//! The trait user code implements. The adapter owns the computation and
//! calls it one callback at a time, so implementations keep plain `&mut self`
//! state with no locking.

use crate::context::Context;
use crate::model::Metadata;
use crate::model::Record;

/// Callback result. Any error is fatal to the process.
pub type Result<T> = anyhow::Result<T>;

#[async_trait::async_trait]
pub trait Computation: Send {
    /// Called once before any record or timer.
    async fn init(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once, last.
    async fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    async fn process_record(&mut self, _ctx: &mut Context<'_>, _record: Record) -> Result<()> {
        anyhow::bail!("process_record is not implemented")
    }

    /// `time` is the fire time the timer was set for, in epoch millis.
    async fn process_timer(&mut self, _ctx: &mut Context<'_>, _key: String, _time: i64) -> Result<()> {
        anyhow::bail!("process_timer is not implemented")
    }

    fn metadata(&self) -> Result<Metadata>;
}
