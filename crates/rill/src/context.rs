//! # Invocation Context
//!
//! What a computation callback sees of the outside world.
//!
//! Records and timers are buffered into the context's `Transaction` and
//! returned to the proxy when the callback completes. State access is not
//! buffered: it goes to the proxy immediately and stays applied whatever
//! happens to the transaction.
//!
//! A failed state access fails the callback, even if the computation
//! discards the error it was handed.

use crate::model::Record;
use crate::model::Transaction;
use crate::proxy::ProxyError;
use crate::proxy::ProxyHandle;

pub struct Context<'p> {
    tx: Transaction,
    proxy: &'p mut ProxyHandle,
    /// First state access that failed.
    failed: Option<ProxyError>,
}

impl<'p> Context<'p> {
    pub fn new(proxy: &'p mut ProxyHandle) -> Self {
        Self { tx: Transaction::new(), proxy, failed: None }
    }

    /// Emits a record on `stream`. The stream is not checked against the
    /// declared outputs.
    pub fn produce_record(&mut self, stream: impl Into<String>, key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) {
        self.tx.records.push(Record::new(stream, key, data));
    }

    /// Requests a timer callback at `time` (epoch millis). Setting the same
    /// key again replaces the earlier time.
    pub fn set_timer(&mut self, key: impl Into<String>, time: i64) {
        self.tx.timers.insert(key.into(), time);
    }

    pub async fn get_state(&mut self, key: &str) -> Result<Vec<u8>, ProxyError> {
        let result = self.proxy.get_state(key).await;
        self.note(result)
    }

    pub async fn set_state(&mut self, key: &str, value: &[u8]) -> Result<(), ProxyError> {
        let result = self.proxy.set_state(key, value).await;
        self.note(result)
    }

    fn note<T>(&mut self, result: Result<T, ProxyError>) -> Result<T, ProxyError> {
        if let (None, Err(e)) = (self.failed.as_ref(), result.as_ref()) {
            self.failed = Some(e.clone());
        }
        result
    }

    /// The effects requested so far.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn into_transaction(self) -> Transaction {
        self.tx
    }

    /// The buffered transaction, or the first state access that failed.
    pub fn finish(self) -> Result<Transaction, ProxyError> {
        match self.failed {
            Some(e) => Err(e),
            None => Ok(self.tx),
        }
    }
}
