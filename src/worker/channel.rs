//! The worker's end of the protocol channel.
//!
//! Frames travel over the file descriptors the broker piped to stdin and
//! stdout, but handler code is free to print. On Unix the channel takes
//! private duplicates of fds 0 and 1, then points fd 1 at stderr and fd 0 at
//! `/dev/null`. After that, `println!` from a handler or the factory lands in
//! the worker's log output and can never corrupt a frame.

use std::io::{self, BufReader, BufWriter};

#[cfg(unix)]
use std::fs::File;

#[cfg(unix)]
pub(crate) type ChannelReader = BufReader<File>;
#[cfg(unix)]
pub(crate) type ChannelWriter = BufWriter<File>;

#[cfg(not(unix))]
pub(crate) type ChannelReader = BufReader<io::Stdin>;
#[cfg(not(unix))]
pub(crate) type ChannelWriter = BufWriter<io::Stdout>;

/// Reader and writer for frames, detached from the process's stdio.
pub(crate) struct ProtocolChannel {
    pub(crate) reader: ChannelReader,
    pub(crate) writer: ChannelWriter,
}

impl ProtocolChannel {
    /// Take over stdin/stdout for the protocol.
    ///
    /// Must run before any handler code, including the factory.
    #[cfg(unix)]
    pub(crate) fn claim() -> io::Result<Self> {
        use std::os::fd::AsFd;

        let stdin = io::stdin();
        let stdout = io::stdout();
        io::Write::flush(&mut stdout.lock())?;

        // CLOEXEC duplicates: subprocesses started by handlers must not keep
        // the channel open after the worker exits.
        let input = stdin.as_fd().try_clone_to_owned()?;
        let output = stdout.as_fd().try_clone_to_owned()?;

        nix::unistd::dup2_stdout(io::stderr()).map_err(io::Error::from)?;
        let null = File::open("/dev/null")?;
        nix::unistd::dup2_stdin(&null).map_err(io::Error::from)?;

        log::debug!(
            target: "offload::worker",
            "Protocol channel detached from stdio"
        );

        Ok(Self {
            reader: BufReader::new(File::from(input)),
            writer: BufWriter::new(File::from(output)),
        })
    }

    /// Use stdin/stdout directly; handler output is not separated.
    #[cfg(not(unix))]
    pub(crate) fn claim() -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(io::stdin()),
            writer: BufWriter::new(io::stdout()),
        })
    }
}
