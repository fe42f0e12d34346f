use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use crate::tracker::generate_peer_id;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Parser)]
#[command(name = "nibble-torrent")]
#[command(about = "A NibbleTorrent peer written in Rust", long_about = None)]
pub struct Cli {
    /// Turn on debugging messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file and keep seeding it
    Share {
        /// Your NetID, used to build the peer ID
        netid: String,

        /// The torrent file for the file you want to download
        torrent: PathBuf,

        /// The port to receive peer connections from
        #[arg(short, long, default_value = "8088")]
        port: u16,

        /// The folder to download to and seed from
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,

        /// Maximum number of peers to download from at once
        #[arg(long, default_value = "8")]
        max_peers: usize,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Share {
                netid,
                torrent,
                port,
                dest,
                max_peers,
            } => {
                let config = ClientConfig {
                    peer_id: generate_peer_id(netid),
                    download_dir: dest.clone(),
                    listen_port: *port,
                    max_peers: *max_peers,
                    ..ClientConfig::default()
                };

                let client = TorrentClient::new(config);
                client.run(torrent).await.inspect_err(|e| {
                    if e.is_fatal() {
                        error!("Startup failed: {}", e);
                    }
                })?;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &Path) -> Result<()> {
        let descriptor = crate::torrent::load_torrent_file(torrent_path).await?;

        println!("Torrent Information");
        println!("==================");
        println!("Torrent ID: {}", descriptor.torrent_id);
        println!("Tracker: {}", descriptor.tracker_url);
        println!("File: {}", descriptor.file_name);
        println!("Total Size: {} bytes", descriptor.file_size);
        println!("Piece Size: {} bytes", descriptor.piece_size);
        println!("Number of Pieces: {}", descriptor.piece_count());
        println!("\nPiece Hashes:");

        for (i, hash) in descriptor.piece_hashes.iter().enumerate() {
            println!("  {}: {} ({} bytes)", i, hash.to_hex(), descriptor.piece_len(i));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_share_defaults() {
        let cli = Cli::try_parse_from(["nibble-torrent", "share", "jdoe", "file.torrent"]).unwrap();
        assert!(!cli.verbose());
        match cli.command {
            Commands::Share { netid, port, dest, max_peers, .. } => {
                assert_eq!(netid, "jdoe");
                assert_eq!(port, 8088);
                assert_eq!(dest, PathBuf::from("."));
                assert_eq!(max_peers, 8);
            }
            Commands::Info { .. } => panic!("expected share"),
        }
    }

    #[test]
    fn test_parse_share_flags() {
        let cli = Cli::try_parse_from([
            "nibble-torrent", "share", "jdoe", "file.torrent", "-p", "9000", "-d", "out", "-v",
        ])
        .unwrap();
        assert!(cli.verbose());
        assert!(matches!(cli.command, Commands::Share { port: 9000, .. }));
    }
}
