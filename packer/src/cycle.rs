use crate::error::{Error, Result};

/// Round-robin supplier over a non-empty dictionary.
///
/// Yields forever. `cycle_count` tells how many full passes were made since
/// the last [`Cycler::reset_cycle_count`], so a caller probing for an unused
/// candidate can stop after exactly one pass:
///
/// ```
/// # use apkshield::cycle::Cycler;
/// let mut names = Cycler::new(vec!["a", "b"]).unwrap();
/// names.reset_cycle_count();
/// let mut seen = Vec::new();
/// while names.cycle_count() == 0 {
///     seen.extend(names.next());
/// }
/// assert_eq!(seen, ["a", "b"]);
/// ```
#[derive(Debug, Clone)]
pub struct Cycler<T> {
    items: Vec<T>,
    index: usize,
    steps: usize,
    cycles: usize,
}

impl<T: Clone> Cycler<T> {
    pub fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::EmptyDictionary);
        }
        Ok(Self {
            items,
            index: 0,
            steps: 0,
            cycles: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cycle_count(&self) -> usize {
        self.cycles
    }

    /// Starts a new attempt. The position is kept so the next attempt resumes
    /// where the previous one stopped.
    pub fn reset_cycle_count(&mut self) {
        self.steps = 0;
        self.cycles = 0;
    }
}

impl<T: Clone> Iterator for Cycler<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.items[self.index].clone();
        self.index = (self.index + 1) % self.items.len();
        self.steps += 1;
        if self.steps == self.items.len() {
            self.steps = 0;
            self.cycles += 1;
        }
        Some(item)
    }
}

/// Probes candidates built from the dictionary until `accept` takes one, or a
/// full pass completes without success.
pub fn find_candidate<T, F, A>(cycler: &mut Cycler<T>, mut build: F, mut accept: A) -> Option<String>
where
    T: Clone,
    F: FnMut(&T) -> String,
    A: FnMut(&str) -> bool,
{
    cycler.reset_cycle_count();
    while cycler.cycle_count() == 0 {
        let token = cycler.next()?;
        let candidate = build(&token);
        if accept(&candidate) {
            return Some(candidate);
        }
    }
    None
}
