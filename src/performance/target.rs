use crate::error::CallError;
use crate::performance::outcome::Reply;
use crate::performance::payload::Payload;
use async_trait::async_trait;

/// An open session to the service under test.
///
/// A session belongs to exactly one worker for exactly one iteration. It is
/// released when dropped, which covers early returns, errors and cancellation
/// by the grace timeout alike.
#[async_trait]
pub trait Session: Send {
    async fn invoke(&mut self, payload: &Payload) -> Result<Reply, CallError>;
}

/// Opens sessions to the service under test. Shared by every worker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, CallError>;

    /// Short human description used in progress output.
    fn describe(&self) -> String;
}
