//! Background coordination: the dispatcher loop, the completion handler,
//! and the reaper. Exactly one of each runs per control-plane instance.

pub mod completion;
pub mod dispatcher;
pub mod reaper;

pub use completion::CompletionHandler;
pub use dispatcher::Dispatcher;
pub use reaper::Reaper;
