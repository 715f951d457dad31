use anyhow::Result;
use clap::Parser;
use lsmkv::db::Db;
use lsmkv::Config;
use rustyline::DefaultEditor;
use std::ops::Bound;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lsmkv-cli", about = "interactive shell over an lsmkv store")]
struct Args {
    #[arg(long, default_value = "lsmkv.db")]
    path: PathBuf,
    #[arg(long, default_value_t = 4096)]
    block_size: usize,
    #[arg(long, default_value_t = 7)]
    num_levels: usize,
    #[arg(long, default_value_t = 4)]
    l0_compaction_trigger: usize,
}

#[derive(Debug)]
enum Command {
    Init { begin: u64, end: u64 },
    Put { key: String, value: String },
    Del { key: String },
    Get { key: String },
    Scan { lower: Option<String>, upper: Option<String> },
    Flush,
    Compact,
    Dump,
    Quit,
}

impl Command {
    fn parse(input: &str) -> Result<Self> {
        use nom::branch::*;
        use nom::bytes::complete::*;
        use nom::character::complete::*;
        use nom::combinator::*;
        use nom::sequence::*;

        let uint = |i| {
            map_res(digit1::<&str, nom::error::Error<_>>, |s: &str| {
                s.parse()
                    .map_err(|_| nom::error::Error::new(s, nom::error::ErrorKind::Digit))
            })(i)
        };

        let string = |i| {
            map(take_till1(|c: char| c.is_whitespace()), |s: &str| {
                s.to_string()
            })(i)
        };

        let init = |i| {
            map(
                tuple((tag_no_case("init"), space1, uint, space1, uint)),
                |(_, _, begin, _, end)| Command::Init { begin, end },
            )(i)
        };

        let put = |i| {
            map(
                tuple((tag_no_case("put"), space1, string, space1, string)),
                |(_, _, key, _, value)| Command::Put { key, value },
            )(i)
        };

        let del = |i| {
            map(
                tuple((tag_no_case("del"), space1, string)),
                |(_, _, key)| Command::Del { key },
            )(i)
        };

        let get = |i| {
            map(
                tuple((tag_no_case("get"), space1, string)),
                |(_, _, key)| Command::Get { key },
            )(i)
        };

        let scan = |i| {
            map(
                tuple((
                    tag_no_case("scan"),
                    opt(tuple((space1, string, space1, string))),
                )),
                |(_, opt_args)| {
                    let (lower, upper) = opt_args
                        .map_or((None, None), |(_, lower, _, upper)| (Some(lower), Some(upper)));
                    Command::Scan { lower, upper }
                },
            )(i)
        };

        let command = |i| {
            alt((
                init,
                put,
                del,
                get,
                scan,
                map(tag_no_case("flush"), |_| Command::Flush),
                map(tag_no_case("compact"), |_| Command::Compact),
                map(tag_no_case("dump"), |_| Command::Dump),
                map(tag_no_case("quit"), |_| Command::Quit),
                map(tag_no_case("exit"), |_| Command::Quit),
            ))(i)
        };

        command(input)
            .map(|(_, c)| c)
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

fn handle(db: &Db, command: Command) -> Result<bool> {
    match command {
        Command::Init { begin, end } => {
            // shuffled insertion order gives level 0 overlapping files,
            // which is what makes compaction interesting to watch.
            use rand::seq::SliceRandom;
            let mut ids: Vec<u64> = (begin..=end).collect();
            ids.shuffle(&mut rand::thread_rng());
            for i in ids {
                db.put(format!("key{i:06}").as_bytes(), format!("value{i}").as_bytes())?;
            }
            println!("inserted {} keys", end - begin + 1);
        }
        Command::Put { key, value } => {
            db.put(key.as_bytes(), value.as_bytes())?;
        }
        Command::Del { key } => {
            db.delete(key.as_bytes())?;
        }
        Command::Get { key } => match db.get(key.as_bytes())? {
            Some(value) => println!("{}={}", key, String::from_utf8_lossy(&value)),
            None => println!("{} not found", key),
        },
        Command::Scan { lower, upper } => {
            let lower_bound = lower
                .as_ref()
                .map_or(Bound::Unbounded, |k| Bound::Included(k.as_bytes()));
            let upper_bound = upper
                .as_ref()
                .map_or(Bound::Unbounded, |k| Bound::Included(k.as_bytes()));
            let mut iter = db.iter_range(lower_bound, upper_bound, None)?;
            let mut count = 0usize;
            while iter.is_valid() {
                println!(
                    "{}={}",
                    String::from_utf8_lossy(iter.key()),
                    String::from_utf8_lossy(iter.value())
                );
                count += 1;
                iter.next()?;
            }
            println!("{count} keys scanned");
        }
        Command::Flush => {
            db.force_flush()?;
            println!("flushed");
        }
        Command::Compact => {
            let did_work = db.force_compaction()?;
            println!("{}", if did_work { "compacted" } else { "nothing to compact" });
        }
        Command::Dump => {
            // no introspection command surface yet; force a flush so the
            // manifest and files reflect everything written.
            db.force_flush()?;
            println!("state flushed to disk");
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::new(&args.path);
    config.block_size = args.block_size;
    config.num_levels = args.num_levels;
    config.l0_compaction_trigger = args.l0_compaction_trigger;

    let db = Db::open(&args.path, config)?;
    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("lsmkv> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        editor.add_history_entry(&line)?;
        match Command::parse(&line) {
            Ok(command) => match handle(&db, command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("error: {e}"),
            },
            Err(e) => println!("parse error: {e}"),
        }
    }
    db.close()?;
    Ok(())
}
