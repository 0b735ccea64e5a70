// Library interface for tailsource
// Log sources over live text files: line indexing, parsing, multi-line
// grouping, merging and filtering, each stage a randomly addressable source

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod detect;
pub mod file_source;
pub mod filter;
pub mod merge;
pub mod multiline;
pub mod notify;
pub mod parse;
pub mod reader;
pub mod scheduler;
pub mod source;
pub mod watcher;

#[cfg(test)]
mod test_utils;
