//! Single-writer, many-reader progress cell.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Result, SagaError};

/// The only values progress may take.
pub const PROGRESS_VALUES: [u8; 5] = [0, 25, 50, 75, 100];

/// Creates a connected writer/reader pair starting at 0.
pub fn progress_channel() -> (ProgressWriter, ProgressReader) {
    progress_channel_from(0)
}

/// Creates a pair starting at a value restored from history.
pub fn progress_channel_from(initial: u8) -> (ProgressWriter, ProgressReader) {
    let cell = Arc::new(AtomicU8::new(initial));
    (
        ProgressWriter { cell: cell.clone() },
        ProgressReader { cell },
    )
}

/// Write half. Not `Clone`: one orchestrator owns it.
#[derive(Debug)]
pub struct ProgressWriter {
    cell: Arc<AtomicU8>,
}

impl ProgressWriter {
    /// Checks that `value` is allowed and does not move progress backwards.
    pub fn validate(&self, value: u8) -> Result<()> {
        let current = self.get();
        if !PROGRESS_VALUES.contains(&value) || value < current {
            return Err(SagaError::InvalidProgress { value, current });
        }
        Ok(())
    }

    /// Publishes a new value to every reader.
    pub fn set(&self, value: u8) -> Result<()> {
        self.validate(value)?;
        self.cell.store(value, Ordering::Release);
        Ok(())
    }

    pub fn get(&self) -> u8 {
        self.cell.load(Ordering::Acquire)
    }

    /// Returns a new reader over the same cell.
    pub fn reader(&self) -> ProgressReader {
        ProgressReader {
            cell: self.cell.clone(),
        }
    }
}

/// Read half. Never blocks, never fails.
#[derive(Debug, Clone)]
pub struct ProgressReader {
    cell: Arc<AtomicU8>,
}

impl ProgressReader {
    pub fn get(&self) -> u8 {
        self.cell.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let (writer, reader) = progress_channel();
        assert_eq!(writer.get(), 0);
        assert_eq!(reader.get(), 0);
    }

    #[test]
    fn test_restored_channel_keeps_its_floor() {
        let (writer, reader) = progress_channel_from(75);
        assert_eq!(reader.get(), 75);
        assert!(writer.set(50).is_err());
        writer.set(100).unwrap();
        assert_eq!(reader.get(), 100);
    }

    #[test]
    fn test_readers_see_writes_immediately() {
        let (writer, reader) = progress_channel();
        let other = writer.reader();

        writer.set(25).unwrap();
        assert_eq!(reader.get(), 25);
        assert_eq!(other.get(), 25);
    }

    #[test]
    fn test_rejects_values_outside_the_allowed_set() {
        let (writer, reader) = progress_channel();
        assert!(matches!(
            writer.set(30),
            Err(SagaError::InvalidProgress { value: 30, .. })
        ));
        assert_eq!(reader.get(), 0);
    }

    #[test]
    fn test_rejects_going_backwards() {
        let (writer, _) = progress_channel();
        writer.set(50).unwrap();
        assert!(writer.set(25).is_err());
        assert!(writer.set(50).is_ok());
        assert_eq!(writer.get(), 50);
    }

    #[test]
    fn test_concurrent_readers() {
        let (writer, reader) = progress_channel();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = reader.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..1000 {
                        let now = reader.get();
                        assert!(now >= last);
                        assert!(PROGRESS_VALUES.contains(&now));
                        last = now;
                    }
                })
            })
            .collect();

        for value in PROGRESS_VALUES {
            writer.set(value).unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
