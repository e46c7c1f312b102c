//! Agent contract for the bus

use std::cell::RefCell;
use std::rc::Rc;

use super::types::Message;
use crate::error::Result;

/// A named pipeline component.
///
/// The bus calls `on_start`/`on_stop` once per start/stop cycle and
/// `on_message` for every message on a subscribed topic. Instead of holding
/// a publisher, a handler returns the messages it emits; the bus publishes
/// them, in order, as soon as the handler returns.
pub trait Agent {
    /// Agent name, used in logs and error reports
    fn name(&self) -> &str;

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle one message and return the follow-up messages to publish
    fn on_message(&mut self, message: &Message) -> Result<Vec<Message>>;

    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handle under which the bus stores agents.
///
/// `Rc` keeps the pipeline on one thread; callers hold a typed clone of the
/// same handle to inspect agent state.
pub type SharedAgent = Rc<RefCell<dyn Agent>>;

/// Wrap an agent so it can be subscribed and still inspected by its owner
pub fn shared<A: Agent + 'static>(agent: A) -> Rc<RefCell<A>> {
    Rc::new(RefCell::new(agent))
}
