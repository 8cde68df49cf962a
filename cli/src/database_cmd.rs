//! The `database` subcommand: interactive roster management.
//!
//! A prompt → dispatch → continue/exit loop with explicit error returns;
//! a failed action prints its error and returns to the prompt.

use crate::{EXIT_OK, EXIT_USER_ERROR};
use photosort_core::{
    config, engine, AnalysisCache, AnthropicBackend, Config, Roster, DEFAULT_CACHE_FILE,
    DEFAULT_ROSTER_FILE,
};
use std::io::{BufRead, Write};

enum Action {
    Continue,
    Quit,
}

const MENU: &str = "\nphotosort roster database
  add       register a subject from a reference photo
  remove    delete a subject
  list      list all subjects
  show      show one subject in full
  stats     roster statistics
  validate  check roster integrity
  quit      exit\n";

pub async fn run() -> u8 {
    let mut roster = match Roster::load(DEFAULT_ROSTER_FILE) {
        Ok(roster) => roster,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_USER_ERROR;
        }
    };

    println!("{MENU}");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        let Some(line) = prompt("> ", &mut lines) else {
            return EXIT_OK; // EOF
        };
        match dispatch(&line, &mut roster, &mut lines).await {
            Ok(Action::Quit) => return EXIT_OK,
            Ok(Action::Continue) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

fn prompt(
    text: &str,
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
) -> Option<String> {
    print!("{text}");
    let _ = std::io::stdout().flush();
    lines.next()?.ok().map(|l| l.trim().to_string())
}

async fn dispatch(
    command: &str,
    roster: &mut Roster,
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
) -> anyhow::Result<Action> {
    match command {
        "add" => match add(roster, lines).await? {
            Action::Quit => return Ok(Action::Quit),
            Action::Continue => {}
        },
        "remove" => {
            let Some(name) = prompt("name: ", lines) else {
                return Ok(Action::Quit);
            };
            roster.remove(&name)?;
            println!("removed '{name}'");
        }
        "list" => {
            if roster.is_empty() {
                println!("roster is empty");
            }
            for entry in roster.list() {
                println!(
                    "{}  ({} reference{}, added {})",
                    entry.name,
                    entry.reference_paths.len(),
                    if entry.reference_paths.len() == 1 { "" } else { "s" },
                    entry.created_at.format("%Y-%m-%d")
                );
            }
        }
        "show" => {
            let Some(name) = prompt("name: ", lines) else {
                return Ok(Action::Quit);
            };
            match roster.get(&name) {
                Some(entry) => {
                    println!("name: {}", entry.name);
                    for path in &entry.reference_paths {
                        println!("reference: {}", path.display());
                    }
                    println!("added: {}", entry.created_at.to_rfc3339());
                    if !entry.notes.is_empty() {
                        println!("notes: {}", entry.notes);
                    }
                    println!("description:\n{}", entry.description);
                }
                None => println!("'{name}' not found"),
            }
        }
        "stats" => {
            let stats = roster.stats();
            println!("subjects: {}", stats.total);
            if let Some(oldest) = stats.oldest {
                println!("oldest entry: {}", oldest.format("%Y-%m-%d"));
            }
            if let Some(newest) = stats.newest {
                println!("newest entry: {}", newest.format("%Y-%m-%d"));
            }
        }
        "validate" => {
            let issues = roster.validate();
            if issues.is_empty() {
                println!("roster is consistent");
            }
            for issue in issues {
                println!("issue: {issue}");
            }
        }
        "quit" | "exit" | "q" => return Ok(Action::Quit),
        "" => {}
        other => println!("unknown command '{other}'{MENU}"),
    }
    Ok(Action::Continue)
}

async fn add(
    roster: &mut Roster,
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
) -> anyhow::Result<Action> {
    let Some(name) = prompt("name: ", lines) else {
        return Ok(Action::Quit);
    };
    if name.is_empty() {
        anyhow::bail!("name cannot be empty");
    }
    if roster.get(&name).is_some() {
        anyhow::bail!("'{name}' already exists");
    }
    let Some(reference) = prompt("reference image path: ", lines) else {
        return Ok(Action::Quit);
    };
    let Some(notes) = prompt("notes (optional): ", lines) else {
        return Ok(Action::Quit);
    };

    let config = Config::from_env()?;
    let Some(api_key) = config.api_key.clone() else {
        anyhow::bail!(
            "no vision backend credentials; set {}",
            config::ENV_API_KEY
        );
    };
    let backend = AnthropicBackend::new(
        api_key,
        &config.model,
        config.request_timeout(),
        config.retry,
    )?;
    let mut cache = AnalysisCache::load(DEFAULT_CACHE_FILE)?;

    println!("describing reference image, this may take a few seconds...");
    let reference_path = std::path::Path::new(&reference);
    let description =
        engine::describe_face_cached(reference_path, &config, &backend, &mut cache).await?;
    let entry = roster.add(&name, reference_path, &notes, description)?;

    println!("registered '{}'", entry.name);
    let preview: String = entry.description.chars().take(160).collect();
    println!("description preview: {preview}...");
    Ok(Action::Continue)
}
