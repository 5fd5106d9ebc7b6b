use std::{
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

/// A piece of program text together with where it came from.
/// Script files, repl lines, and test snippets all funnel through
/// here, so every span in the pipeline can name a path when an error
/// is printed. Text that never lived in a file gets `./source` as a
/// stand-in path.
///
/// Sources sit behind an `Rc`: spans keep the whole text alive for
/// as long as anything might still report against it.
#[derive(Debug, PartialEq, Eq)]
pub struct Source {
    pub contents: String,
    pub path: PathBuf,
}

impl Source {
    /// Pairs program text with a path. Nothing checks that the file
    /// at `path` actually holds `contents`; use `Source::path` or
    /// `Source::source` unless both pieces are already in hand.
    pub fn new(contents: &str, path: &Path) -> Rc<Source> {
        Rc::new(Source {
            contents: contents.to_string(),
            path: path.to_owned(),
        })
    }

    /// Reads a script file into a new source.
    pub fn path(path: &Path) -> std::io::Result<Rc<Source>> {
        Ok(Source::new(&fs::read_to_string(path)?, path))
    }

    /// Wraps a bare string, for the repl and for tests.
    pub fn source(contents: &str) -> Rc<Source> {
        Source::new(contents, &PathBuf::from("./source"))
    }
}
