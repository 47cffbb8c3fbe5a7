use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Destination for rendered text.
pub trait Sink {
    fn write_text(&mut self, text: &str) -> io::Result<()>;
}

impl Sink for String {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.push_str(text);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        (**self).write_text(text)
    }
}

/// Forwards text unchanged to an [`io::Write`].
#[derive(Debug)]
pub struct IoSink<W: Write>(pub W);

impl<W: Write> Sink for IoSink<W> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.0.write_all(text.as_bytes())
    }
}

impl IoSink<BufWriter<File>> {
    pub fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// The process's standard output.
pub fn stdout() -> IoSink<io::Stdout> {
    IoSink(io::stdout())
}

/// Collapses runs of blank lines to a single blank line.
///
/// A line is blank when nothing but spaces precede its newline; a blank line
/// is forwarded as a bare `"\n"`. A trailing fragment without a newline is
/// held back and prefixed to the next write. It is never forwarded on its
/// own: output that does not end in a newline loses its last line, so
/// every unit of output has to end with one.
#[derive(Debug)]
pub struct SquashWriter<S: Sink> {
    inner: S,
    pending: String,
    newlines: usize,
}

impl<S: Sink> SquashWriter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: String::new(),
            newlines: 0,
        }
    }

    /// The buffered partial line.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns the wrapped sink, discarding any partial line.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for SquashWriter<S> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        for piece in text.split_inclusive('\n') {
            let mut line = std::mem::take(&mut self.pending);
            line.push_str(piece);
            if !line.ends_with('\n') {
                self.pending = line;
                break;
            }

            let stripped = line.trim_start_matches(' ');
            if stripped != "\n" {
                self.newlines = 1;
                self.inner.write_text(&line)?;
            } else {
                self.newlines += 1;
                if self.newlines > 2 {
                    continue;
                }
                self.inner.write_text("\n")?;
            }
        }
        Ok(())
    }
}
