use std::fmt;
use std::num::NonZeroUsize;

/// A concurrency level: the number of worker threads a [`super::TaskPool`]
/// should use.
///
/// # Guarantees
///
/// - Value is always at least 1 (enforced by `NonZeroUsize`)
/// - Copy-able and lightweight (single usize)
///
/// # Examples
///
/// ```
/// use vanga::concurrency::Concurrency;
///
/// let c = Concurrency::new(4).unwrap();
/// assert_eq!(c.value(), 4);
///
/// let c = Concurrency::available_cores();
/// println!("using {} threads", c.value());
///
/// let c = Concurrency::single_threaded();
/// assert_eq!(c.value(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Concurrency {
    value: NonZeroUsize,
}

impl Concurrency {
    /// Creates a new `Concurrency` with the given value.
    ///
    /// Returns `None` if `value` is 0.
    pub fn new(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(|v| Self { value: v })
    }

    /// Creates a new `Concurrency` with the given value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is 0. `T` defaults to 1 (see [`Concurrency::default`]); this
    /// constructor is for call sites that have already validated `T >= 1`.
    pub fn of(value: usize) -> Self {
        Self::new(value).unwrap_or_else(|| {
            panic!("concurrency must be at least 1, got '{}'", value)
        })
    }

    /// Returns the concurrency level.
    #[inline]
    pub fn value(&self) -> usize {
        self.value.get()
    }

    /// Returns the square of the concurrency level.
    ///
    /// Used by the tree learner to size per-bag-per-feature scratch buffers.
    #[inline]
    pub fn squared(&self) -> usize {
        let v = self.value();
        v * v
    }

    /// Creates a concurrency level from the number of available CPU cores.
    pub fn available_cores() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            value: NonZeroUsize::new(cpus).unwrap(),
        }
    }

    /// The default concurrency level: single-threaded.
    pub const fn single_threaded() -> Self {
        Self {
            value: unsafe { NonZeroUsize::new_unchecked(1) },
        }
    }

    /// Converts from `usize`, clamping 0 up to 1 instead of failing.
    pub fn from_usize(value: usize) -> Self {
        Self::new(value.max(1)).unwrap()
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::single_threaded()
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Concurrency({})", self.value())
    }
}

impl From<NonZeroUsize> for Concurrency {
    fn from(value: NonZeroUsize) -> Self {
        Self { value }
    }
}

impl TryFrom<usize> for Concurrency {
    type Error = ConcurrencyError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ConcurrencyError::InvalidValue(value))
    }
}

/// Error returned by `TryFrom<usize> for Concurrency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyError {
    InvalidValue(usize),
}

impl fmt::Display for ConcurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyError::InvalidValue(v) => {
                write!(f, "concurrency must be at least 1, got '{}'", v)
            }
        }
    }
}

impl std::error::Error for ConcurrencyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid() {
        assert_eq!(Concurrency::new(4).unwrap().value(), 4);
    }

    #[test]
    fn new_invalid() {
        assert!(Concurrency::new(0).is_none());
    }

    #[test]
    #[should_panic(expected = "concurrency must be at least 1")]
    fn of_invalid() {
        let _ = Concurrency::of(0);
    }

    #[test]
    fn squared() {
        assert_eq!(Concurrency::of(4).squared(), 16);
        assert_eq!(Concurrency::of(1).squared(), 1);
    }

    #[test]
    fn available_cores_is_at_least_one() {
        assert!(Concurrency::available_cores().value() >= 1);
    }

    #[test]
    fn from_usize_clamps_zero() {
        assert_eq!(Concurrency::from_usize(0).value(), 1);
    }

    #[test]
    fn default_is_single_threaded() {
        assert_eq!(Concurrency::default().value(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(Concurrency::of(4).to_string(), "Concurrency(4)");
    }

    #[test]
    fn try_from_rejects_zero() {
        let c: Result<Concurrency, _> = 0.try_into();
        assert!(c.is_err());
    }
}
