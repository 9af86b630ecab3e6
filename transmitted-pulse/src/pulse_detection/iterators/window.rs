use super::Window;

/// Iterator which applies a window to another iterator.
#[derive(Clone)]
pub(crate) struct WindowIter<I, W>
where
    I: Iterator<Item = W::InputType>,
    W: Window,
{
    /// Window function to apply.
    window_function: W,
    /// Source.
    source: I,
}

impl<I, W> WindowIter<I, W>
where
    I: Iterator<Item = W::InputType>,
    W: Window,
{
    /// Creates a new iterator which applies the given window.
    ///
    /// # Parameters
    /// - source: base iterator which is consumed.
    /// - window_function: window to apply to the base iterator.
    pub(crate) fn new(source: I, window_function: W) -> Self {
        WindowIter {
            source,
            window_function,
        }
    }
}

impl<I, W> Iterator for WindowIter<I, W>
where
    I: Iterator<Item = W::InputType>,
    W: Window,
{
    type Item = W::OutputType;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.source.next() {
                Some(value) => {
                    if self.window_function.push(value) {
                        return Some(self.window_function.output());
                    }
                }
                None => {
                    return self
                        .window_function
                        .drain()
                        .then(|| self.window_function.output());
                }
            }
        }
    }
}

/// Provides method for creating a window iterator from another iterator.
pub(crate) trait WindowFilter<I, W>
where
    I: Iterator<Item = W::InputType>,
    W: Window,
{
    /// Creates an iterator which applies a window to the iterator.
    fn window(self, window: W) -> WindowIter<I, W>;
}

impl<I, W> WindowFilter<I, W> for I
where
    I: Iterator<Item = W::InputType>,
    W: Window,
{
    fn window(self, window: W) -> WindowIter<I, W> {
        WindowIter::new(self, window)
    }
}
