/// A value with an optional locally-applied change awaiting confirmation.
///
/// `get` returns the pending value while one exists. `confirm` makes it the
/// confirmed value; `rollback` discards it.
#[derive(Clone, Debug, PartialEq)]
pub struct Speculative<T> {
    confirmed: T,
    pending: Option<T>,
}

impl<T: Clone> Speculative<T> {
    pub fn new(value: T) -> Self {
        Self {
            confirmed: value,
            pending: None,
        }
    }

    pub fn get(&self) -> &T {
        self.pending.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn apply(&mut self, value: T) {
        self.pending = Some(value);
    }

    pub fn confirm(&mut self) {
        if let Some(value) = self.pending.take() {
            self.confirmed = value;
        }
    }

    pub fn rollback(&mut self) {
        self.pending = None;
    }

    /// Apply `value`, run `commit` against it, then confirm on `Ok` or roll
    /// back on `Err`.
    pub fn commit_with<E>(
        &mut self,
        value: T,
        commit: impl FnOnce(&T) -> Result<(), E>,
    ) -> Result<(), E> {
        self.apply(value);
        let result = commit(self.get());
        match result {
            Ok(()) => self.confirm(),
            Err(_) => self.rollback(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_value_shadows_confirmed() {
        let mut value = Speculative::new(1);
        value.apply(2);
        assert_eq!(*value.get(), 2);
        assert_eq!(*value.confirmed(), 1);
        assert!(value.is_pending());
        value.confirm();
        assert_eq!(*value.confirmed(), 2);
        assert!(!value.is_pending());
    }

    #[test]
    fn rollback_restores_confirmed() {
        let mut value = Speculative::new("a");
        value.apply("b");
        value.rollback();
        assert_eq!(*value.get(), "a");
    }

    #[test]
    fn commit_with_confirms_or_rolls_back() {
        let mut value = Speculative::new(false);
        assert!(value.commit_with(true, |_| Ok::<(), ()>(())).is_ok());
        assert!(*value.get());

        let result = value.commit_with(false, |v| {
            assert!(!*v);
            Err("write failed")
        });
        assert_eq!(result, Err("write failed"));
        assert!(*value.get());
        assert!(!value.is_pending());
    }

    #[test]
    fn confirm_without_pending_is_noop() {
        let mut value = Speculative::new(5);
        value.confirm();
        assert_eq!(*value.get(), 5);
    }
}
