use super::{DataLines, DataPool, DataPoolError};

/// Arithmetic sequence of numbers, optionally zero padded to a fixed width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDataPool {
    start: i64,
    amount: u64,
    step: i64,
    pad: bool,
}

impl RangeDataPool {
    pub fn new(start: i64, amount: u64, step: i64, pad: bool) -> Result<Self, DataPoolError> {
        if step == 0 {
            return Err(DataPoolError::InvalidRange("step must not be zero".into()));
        }
        if amount > 0 {
            let span = i64::try_from(amount - 1)
                .ok()
                .and_then(|n| n.checked_mul(step))
                .and_then(|n| n.checked_add(start));
            if span.is_none() {
                return Err(DataPoolError::InvalidRange(format!(
                    "{amount} values from {start} with step {step} overflow"
                )));
            }
        }
        Ok(Self {
            start,
            amount,
            step,
            pad,
        })
    }

    fn width(&self) -> usize {
        if !self.pad || self.amount == 0 {
            return 0;
        }
        let last = self.start + (self.amount as i64 - 1) * self.step;
        digits(self.start).max(digits(last))
    }
}

fn digits(n: i64) -> usize {
    n.unsigned_abs().to_string().len()
}

impl DataPool for RangeDataPool {
    fn total(&self) -> Option<u64> {
        Some(self.amount)
    }

    fn lines(&self, skip: u64) -> Result<DataLines, DataPoolError> {
        let Self { start, step, .. } = *self;
        let width = self.width();

        Ok(Box::new((skip.min(self.amount)..self.amount).map(move |i| {
            let value = start + i as i64 * step;
            Ok(if value < 0 {
                format!("-{:0width$}", value.unsigned_abs())
            } else {
                format!("{value:0width$}")
            })
        })))
    }

    fn reload(&mut self) -> Result<(), DataPoolError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "range"
    }
}

/// Endless empty lines
#[derive(Debug, Clone, Copy, Default)]
pub struct InfiniteDataPool;

impl DataPool for InfiniteDataPool {
    fn total(&self) -> Option<u64> {
        None
    }

    fn lines(&self, _skip: u64) -> Result<DataLines, DataPoolError> {
        Ok(Box::new(std::iter::repeat_with(|| Ok(String::new()))))
    }

    fn reload(&mut self) -> Result<(), DataPoolError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "infinite"
    }
}
