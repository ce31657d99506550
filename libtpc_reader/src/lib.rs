//! # tpc_reader
//!
//! tpc_reader decodes the raw data of GET/AGET and AFTER based TPC read-out electronics,
//! written in Rust. It reads two containers: the indexed 16-bit token stream of the
//! acquisition (`.aqs` files) and MIDAS-style bank containers (`.mid`, optionally
//! compressed). Either way the result is a stream of [`raw_event::RawEvent`]s, one dense
//! waveform per pad channel.
//!
//! ## Installation
//!
//! In the future we may deploy to crates.io, but currently the only method of install is
//! from source. Clone the repository and use `cargo install --path ./tpc_reader_cli` from
//! the top level of the repository. Tools which only need the decoders can depend on
//! `libtpc_reader` directly.
//!
//! ### External tools
//!
//! Remote and compressed sources are read through external programs for some formats:
//! `ssh` and `dd` for `ssh://` sources, `dccp` for `dccp://` sources, and `bzip2` for
//! `.bz2` files. gzip and LZ4 are decoded in process.
//!
//! ## Sources
//!
//! A source is a string. Scheme prefixes select a remote transport, suffixes select
//! decompression:
//!
//! - `/data/run_0001.aqs`: token stream, random access through the event index
//! - `/data/run_0001.mid.lz4`: bank container, read forward
//! - `ssh://daq@host/data/run_0001.mid.gz`: fetched remotely, decompressed locally
//! - `pipein://<command>`: the standard output of any shell command
//!
//! Without a known suffix, a file starting with a bank container begin-of-run record is
//! read as a bank container. See [`data_source::open_source`].
//!
//! ## Configuration
//!
//! The CLI is driven by a YAML configuration file:
//!
//! ```yml
//! input: /data/run_0001.aqs
//! output_path: null
//! tracker_path: null
//! sample_index_offset_zs: 0
//! max_events: null
//! monitor:
//!   poll_interval_ms: 400
//!   idle_poll_limit: null
//! ```
//!
//! - `input`: the source string
//! - `output_path`: where converted events are written, the input name with a `.yml`
//! suffix if `null`
//! - `tracker_path`: optional beam tracker file recorded alongside the run
//! - `sample_index_offset_zs`: offset applied to time bins of zero-suppressed data
//! - `max_events`: stop the conversion after this many events
//! - `monitor`: polling controls used when following a file which is still written
//!
//! ## Output
//!
//! Converted events are dumped as a sequence of YAML documents, one per event, with the
//! hits of the event and the matching tracker positions. Other output formats implement
//! [`event_sink::EventSink`].
pub mod aqs_file;
pub mod channel_id;
pub mod config;
pub mod constants;
pub mod data_source;
pub mod error;
pub mod event_builder;
pub mod event_index;
pub mod event_sink;
pub mod item;
pub mod lz4_reader;
pub mod midas_event;
pub mod midas_source;
pub mod monitor;
pub mod process;
pub mod raw_event;
pub mod token_decoder;
pub mod token_writer;
pub mod tracker;
pub mod transport;
pub mod worker_status;
