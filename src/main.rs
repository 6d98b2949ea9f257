use subfeed::app::Command;

const USAGE: &str = "Subfeed - Browse subreddit feeds through a credential-holding proxy.

Usage:
  subfeed [serve]                      Run the proxy
  subfeed feed <subreddit> [--pages N] Print a subreddit's hot posts via the proxy
  subfeed search <query>               Search subreddits via the proxy

Options:
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("error: {msg}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    dotenvy::dotenv().ok();
    if let Err(err) = subfeed::run(command) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String]) -> bool {
    let mut saw_flag = false;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("subfeed {}", subfeed::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Serve);
    };
    match name.as_str() {
        "serve" => Ok(Command::Serve),
        "feed" => {
            let mut subreddit = None;
            let mut pages = 1;
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                if arg == "--pages" {
                    let value = iter.next().ok_or("--pages needs a value")?;
                    pages = value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid page count {value:?}"))?;
                } else if subreddit.is_none() {
                    subreddit = Some(arg.clone());
                } else {
                    return Err(format!("unexpected argument {arg:?}"));
                }
            }
            let subreddit = subreddit.ok_or("feed needs a subreddit")?;
            Ok(Command::Feed { subreddit, pages })
        }
        "search" => {
            let query = rest.join(" ");
            if query.trim().is_empty() {
                return Err("search needs a query".into());
            }
            Ok(Command::Search { query })
        }
        other => Err(format!("unknown command {other:?}")),
    }
}
