//! The dask "delayed" tutorial expressed with `lazydag`: two `inc` calls and
//! an `add` are recorded into a graph, visualized, computed on a local pool
//! of workers, and finally a scores file is read from the data directory.
pub mod cli;
pub mod tutorial;
