/// LIFO registry of teardown actions.
///
/// Resources created during initialization register their destructor here at
/// creation time; `flush` runs them newest first so dependents go before the
/// objects they were built from.
#[derive(Default)]
pub struct DeletionQueue {
    deletors: Vec<(&'static str, Box<dyn FnOnce() + Send>)>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: &'static str, deletor: impl FnOnce() + Send + 'static) {
        self.deletors.push((label, Box::new(deletor)));
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }

    pub fn flush(&mut self) {
        while let Some((label, deletor)) = self.deletors.pop() {
            log::trace!("Destroying {label}");
            deletor();
        }
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.deletors.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending entries; flushing",
                self.deletors.len()
            );
            self.flush();
        }
    }
}
