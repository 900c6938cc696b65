use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use folio::config::{AuthKind, ProfileStore, ServerProfile};
use folio::download::{DownloadOutcome, Downloader};
use folio::library::DirectoryImport;
use folio::opds::{parse_feed, Feed, Fetcher};
use folio::session::CatalogSession;
use folio::util::format_size;

/// Path of the server list (~/.config/folio/servers.json).
fn store_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("folio")
        .join("servers.json"))
}

#[derive(Parser, Debug)]
#[command(name = "folio", about = "Browse and download books from OPDS catalogs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured servers
    Servers,
    /// Add a server
    AddServer {
        name: String,
        url: String,
        /// Basic-auth username; omitting both credentials disables auth
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Remove a server by index
    RemoveServer { index: usize },
    /// Fetch and print a feed (the server root, or --url)
    Show {
        /// Server index; defaults to the last used server
        #[arg(long)]
        server: Option<usize>,
        /// Feed URL to fetch instead of the server root
        #[arg(long)]
        url: Option<String>,
    },
    /// Search the catalog
    Search {
        #[arg(long)]
        server: Option<usize>,
        query: String,
    },
    /// Download one entry of an acquisition feed by index
    Download {
        #[arg(long)]
        server: Option<usize>,
        /// Acquisition feed URL; defaults to the server root
        #[arg(long)]
        url: Option<String>,
        /// Zero-based entry index within the feed
        index: usize,
        /// Format to fetch when the entry offers several (e.g. "epub")
        #[arg(long)]
        format: Option<String>,
        /// Import into this library directory instead of keeping the
        /// spooled file
        #[arg(long, value_name = "DIR")]
        into: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let path = store_path()?;
    let mut store = ProfileStore::load(&path).context("Failed to load server list")?;

    match args.command {
        Command::Servers => {
            if store.is_empty() {
                println!("No servers configured. Add one with: folio add-server <name> <url>");
                return Ok(());
            }
            for (i, server) in store.servers().iter().enumerate() {
                let marker = if i == store.last_server() { "*" } else { " " };
                let auth = match server.auth {
                    AuthKind::None => "",
                    AuthKind::Basic => " (basic auth)",
                };
                println!("{} {:2}  {}  {}{}", marker, i, server.name, server.url, auth);
            }
        }

        Command::AddServer {
            name,
            url,
            username,
            password,
        } => {
            let auth = if username.is_some() || password.is_some() {
                AuthKind::Basic
            } else {
                AuthKind::None
            };
            let profile = ServerProfile {
                name: name.clone(),
                url,
                auth,
                username,
                password: password.map(Into::into),
            };
            store.add(profile)?;
            store.save().context("Failed to save server list")?;
            println!("Added server \"{}\"", name);
        }

        Command::RemoveServer { index } => match store.remove(index) {
            Some(removed) => {
                store.save().context("Failed to save server list")?;
                println!("Removed server \"{}\"", removed.name);
            }
            None => bail!("No server at index {}", index),
        },

        Command::Show { server, url } => {
            let profile = select_server(&mut store, server)?;
            let fetcher = Fetcher::new()?;
            let feed = match url {
                Some(url) => parse_feed(&fetcher.fetch(&url, &profile).await?)?,
                None => {
                    let mut session = CatalogSession::new();
                    session.open(&fetcher, profile).await?;
                    session
                        .current_feed()
                        .cloned()
                        .context("Session has no feed after open")?
                }
            };
            print_feed(&feed);
        }

        Command::Search { server, query } => {
            let profile = select_server(&mut store, server)?;
            let fetcher = Fetcher::new()?;
            let mut session = CatalogSession::new();
            session.open(&fetcher, profile).await?;
            session.search(&fetcher, &query).await?;
            let feed = session
                .current_feed()
                .context("Session has no feed after search")?;
            print_feed(feed);
        }

        Command::Download {
            server,
            url,
            index,
            format,
            into,
        } => {
            let profile = select_server(&mut store, server)?;
            let fetcher = Fetcher::new()?;
            let feed_url = url.unwrap_or_else(|| profile.url.clone());
            let feed = parse_feed(&fetcher.fetch(&feed_url, &profile).await?)?;

            let shelf = match feed {
                Feed::Acquisition(shelf) => shelf,
                Feed::Navigation(_) => {
                    bail!("{} is a navigation feed; point --url at a book listing", feed_url)
                }
            };
            let entry = shelf
                .entries
                .get(index)
                .with_context(|| format!("Feed has no entry at index {}", index))?;

            if entry.formats.is_empty() {
                println!(
                    "\"{}\" has no downloadable formats on this server.",
                    entry.title
                );
                return Ok(());
            }
            let chosen = match &format {
                Some(wanted) => entry
                    .formats
                    .iter()
                    .find(|f| f.file_type.eq_ignore_ascii_case(wanted))
                    .with_context(|| {
                        format!("\"{}\" has no {} format", entry.title, wanted)
                    })?,
                None if entry.formats.len() == 1 => &entry.formats[0],
                None => {
                    println!("\"{}\" is available in several formats:", entry.title);
                    for f in &entry.formats {
                        println!("  {:6} {}", f.file_type, format_size(f.size));
                    }
                    println!("Pick one with --format <type>.");
                    return Ok(());
                }
            };

            let downloader = Downloader::new();
            match into {
                Some(dir) => {
                    let importer = DirectoryImport::new(dir.clone());
                    downloader
                        .download_and_import(
                            &fetcher,
                            &profile,
                            entry,
                            chosen,
                            Some(&feed_url),
                            &importer,
                        )
                        .await?;
                    println!("Imported \"{}\" into {}", entry.title, dir.display());
                }
                None => {
                    let outcome = downloader
                        .download(&fetcher, &profile, entry, chosen, Some(&feed_url))
                        .await?;
                    if let DownloadOutcome::Saved { path, bytes } = outcome {
                        println!(
                            "Saved \"{}\" ({}) to {}",
                            entry.title,
                            format_size(bytes),
                            path.display()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

/// Resolves the requested (or last used) server and records the selection.
fn select_server(store: &mut ProfileStore, index: Option<usize>) -> Result<ServerProfile> {
    if store.is_empty() {
        bail!("No servers configured. Add one with: folio add-server <name> <url>");
    }
    let index = index.unwrap_or(store.last_server());
    let profile = store
        .get(index)
        .with_context(|| format!("No server at index {}", index))?
        .clone();
    if index != store.last_server() {
        store.set_last_server(index);
        store.save().context("Failed to save server list")?;
    }
    Ok(profile)
}

fn print_feed(feed: &Feed) {
    match feed {
        Feed::Navigation(nav) => {
            println!("{} (navigation)", nav.title);
            for (i, entry) in nav.entries.iter().enumerate() {
                println!("{:3}  {}", i, entry.title);
                if !entry.content.is_empty() {
                    println!("     {}", entry.content);
                }
            }
        }
        Feed::Acquisition(shelf) => {
            match shelf.total_results {
                0 => println!("{} ({} entries)", shelf.title, shelf.entries.len()),
                total => println!("{} ({} of {} results)", shelf.title, shelf.entries.len(), total),
            }
            for (i, entry) in shelf.entries.iter().enumerate() {
                let authors = if entry.authors.is_empty() {
                    String::new()
                } else {
                    format!(" by {}", entry.authors.join(", "))
                };
                println!("{:3}  {}{}", i, entry.title, authors);
                for f in &entry.formats {
                    println!("     {:6} {}", f.file_type.to_uppercase(), format_size(f.size));
                }
            }
            if shelf.next_url.is_some() {
                println!("(more results on the next page)");
            }
        }
    }
}
