#[cfg(not(feature = "playback"))]
fn main() {
    eprintln!(
        "The chime CLI requires the \"playback\" feature. Rebuild with `--features playback` to enable local audio output."
    );
}

#[cfg(feature = "playback")]
mod cli {
    use std::env;
    use std::io::{self, BufRead, Write};
    use std::path::PathBuf;
    use std::sync::Arc;

    use chime::playback::LocalSink;
    use chime::room::{AudioSink, ChannelId, RoomId};
    use chime::{Config, DirectoryDiscoverer, Soundboard, Speaker, VoiceConnector};

    /// The single local room and "voice channel" the CLI plays into.
    const LOCAL_ROOM: RoomId = RoomId(1);
    const LOCAL_CHANNEL: ChannelId = ChannelId(1);

    /// Parsed command-line arguments.
    struct CliArgs {
        config: Option<PathBuf>,
        library: PathBuf,
        help: bool,
    }

    impl CliArgs {
        fn parse() -> Result<Self, String> {
            let mut args = CliArgs {
                config: None,
                library: PathBuf::from("library"),
                help: false,
            };
            let mut iter = env::args().skip(1);
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--config" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| "--config requires a path".to_string())?;
                        args.config = Some(PathBuf::from(value));
                    }
                    "--library" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| "--library requires a path".to_string())?;
                        args.library = PathBuf::from(value);
                    }
                    "-h" | "--help" => args.help = true,
                    other => return Err(format!("unknown argument '{other}'")),
                }
            }
            Ok(args)
        }
    }

    fn print_usage() {
        println!("chime - emoji-triggered soundboard (local playback)");
        println!();
        println!("Usage: chime [--config <file>] [--library <dir>]");
        println!();
        println!("  --config <file>   JSON engine configuration");
        println!("  --library <dir>   Clip library for the directory discoverer (default: library)");
        println!();
        println!("Type text containing emoji to queue sounds, or commands:");
        println!("  /join /leave /skip /sounds /queue");
        println!("  /discover <emoji>   /redo <emoji>   /adminclear <confirm>   /quit");
    }

    /// Opens a fresh local sink per connect; the CLI's stand-in for a real
    /// voice gateway.
    struct LocalConnector;

    impl VoiceConnector for LocalConnector {
        fn connect(
            &self,
            _room: RoomId,
            _channel: ChannelId,
        ) -> chime::Result<Arc<dyn AudioSink>> {
            Ok(Arc::new(LocalSink::open()?))
        }
    }

    pub fn run() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();

        let args = match CliArgs::parse() {
            Ok(args) => args,
            Err(e) => {
                eprintln!("error: {e}");
                print_usage();
                std::process::exit(2);
            }
        };
        if args.help {
            print_usage();
            return Ok(());
        }

        let cfg = match &args.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        let discoverer = Arc::new(DirectoryDiscoverer::new(&args.library, &cfg.sounds_dir));
        let board = Soundboard::open(cfg, discoverer)?;

        println!("chime is up. /join to attach local audio, /quit to leave.");
        let connector = LocalConnector;
        let speaker = Speaker {
            is_bot: false,
            voice_channel: Some(LOCAL_CHANNEL),
        };

        let stdin = io::stdin();
        prompt()?;
        for line in stdin.lock().lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                prompt()?;
                continue;
            }
            if let Some(rest) = line.strip_prefix('/') {
                let (command, argument) = match rest.split_once(' ') {
                    Some((command, argument)) => (command, argument.trim()),
                    None => (rest, ""),
                };
                if matches!(command, "quit" | "exit") {
                    break;
                }
                let reply = match command {
                    "join" => board.join(LOCAL_ROOM, Some(LOCAL_CHANNEL), &connector),
                    "leave" => board.leave(LOCAL_ROOM),
                    "skip" => board.skip(LOCAL_ROOM),
                    "sounds" => board.sounds(),
                    "queue" => board.queue_report(LOCAL_ROOM),
                    "discover" => board.discover(argument),
                    "redo" => board.redo(argument),
                    "adminclear" => board.adminclear(argument),
                    other => format!("Unknown command '/{other}'."),
                };
                println!("{reply}");
            } else {
                let queued = board.handle_message(LOCAL_ROOM, &speaker, line);
                if queued > 0 {
                    println!("Queued {queued} sound(s).");
                }
            }
            prompt()?;
        }

        board.close();
        Ok(())
    }

    fn prompt() -> io::Result<()> {
        print!("> ");
        io::stdout().flush()
    }
}

#[cfg(feature = "playback")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
