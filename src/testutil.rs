//! Test-only helpers shared across module test suites.

#![cfg(test)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A `Write` sink that also keeps a shared handle to its buffer, so a test
/// can inspect what was written after the sink has been moved into (and
/// boxed by) a `ResponseContext<Sink>`.
#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<u8>>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.contents()).unwrap()
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
