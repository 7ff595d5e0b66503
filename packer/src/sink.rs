use std::cell::RefCell;
use std::fmt;

use log::Level;

/// Destination for pipeline log records. Passed explicitly into a session so
/// each embedding decides where protection output goes.
pub trait LogSink {
    fn record(&self, level: Level, tag: &'static str, message: fmt::Arguments<'_>);
}

/// Forwards to the `log` facade, using the tag as the record target.
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn record(&self, level: Level, tag: &'static str, message: fmt::Arguments<'_>) {
        log::log!(target: tag, level, "{}", message);
    }
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: RefCell<Vec<(Level, &'static str, String)>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<(Level, &'static str, String)> {
        self.records.borrow().clone()
    }

    pub fn messages_for(&self, tag: &str) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|(_, t, _)| *t == tag)
            .map(|(_, _, m)| m.clone())
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn record(&self, level: Level, tag: &'static str, message: fmt::Arguments<'_>) {
        self.records
            .borrow_mut()
            .push((level, tag, message.to_string()));
    }
}

/// A sink bound to one pipeline stage.
#[derive(Clone, Copy)]
pub struct Tagged<'a> {
    sink: &'a dyn LogSink,
    tag: &'static str,
}

impl<'a> Tagged<'a> {
    pub fn new(sink: &'a dyn LogSink, tag: &'static str) -> Self {
        Self { sink, tag }
    }

    pub fn debug(&self, message: fmt::Arguments<'_>) {
        self.sink.record(Level::Debug, self.tag, message);
    }

    pub fn info(&self, message: fmt::Arguments<'_>) {
        self.sink.record(Level::Info, self.tag, message);
    }

    pub fn warn(&self, message: fmt::Arguments<'_>) {
        self.sink.record(Level::Warn, self.tag, message);
    }
}
