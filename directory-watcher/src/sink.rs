//! Destinations for resolved events.

use tokio::sync::mpsc;

use crate::error::{Result, WatcherError};
use crate::event::WatchEvent;

/// Receives every resolved event, in delivery order.
///
/// Returning [`WatcherError::ChannelSend`] tells the session that nobody is
/// listening anymore; the session then stops cleanly.
pub trait EventSink {
    fn send(&mut self, event: WatchEvent) -> Result<()>;
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn send(&mut self, event: WatchEvent) -> Result<()> {
        (**self).send(event)
    }
}

impl EventSink for Vec<WatchEvent> {
    fn send(&mut self, event: WatchEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

/// Blocks the calling thread while the channel is full. Must not be used
/// from inside an async task.
impl EventSink for mpsc::Sender<WatchEvent> {
    fn send(&mut self, event: WatchEvent) -> Result<()> {
        self.blocking_send(event)
            .map_err(|_| WatcherError::ChannelSend)
    }
}

/// Adapts a closure into a sink.
#[derive(Debug)]
pub struct FnSink<F>(pub F);

impl<F: FnMut(WatchEvent)> EventSink for FnSink<F> {
    fn send(&mut self, event: WatchEvent) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}
