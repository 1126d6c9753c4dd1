use crate::api::{routes::AppState, server as api_server};
use crate::cli::opts::*;
use crate::config::Config;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use nexuslearn_core::{
    decks::{self, NewCard, NewDeck},
    due_cards, issue_token, mastery_summary, next_due_at,
    memory::MemoryRepo,
    users::register_user,
    Confidence, CoreError, Deck, RepoIdentity, Repository, User,
};
use nexuslearn_json::JsonStore;
use nexuslearn_sqlite::SqliteRepo;
use std::io::{stdin, stdout, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const CSV_HEADER: [&str; 4] = ["question", "answer", "mastery_level", "next_review_at"];

pub async fn run_cli(args: Cli, config: Config) -> Result<()> {
    let repo = open_repo(&args.store, args.db_path.clone(), &config).await?;
    match args.cmd {
        Command::User(cmd) => user_cmd(repo, cmd).await,
        Command::Deck(cmd) => deck_cmd(repo, cmd).await,
        Command::Card(cmd) => card_cmd(repo, cmd).await,
        Command::Review(cmd) => review_cmd(repo, cmd).await,
        Command::Export(cmd) => export_cmd(repo, cmd).await,
        Command::Import(cmd) => import_cmd(repo, cmd).await,
        Command::Serve(cmd) => serve_cmd(repo, cmd, config).await,
    }
}

pub async fn open_repo(
    store: &StoreKind,
    db_path: Option<PathBuf>,
    config: &Config,
) -> Result<Arc<dyn Repository>> {
    match store {
        StoreKind::Json => {
            let s = JsonStore::open_in(&config.data_dir, config.max_backups).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = db_path.unwrap_or_else(|| config.data_dir.join("nexuslearn.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
            let s = SqliteRepo::open_file(&p).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Memory => {
            warn!("using the in-memory store; nothing will be persisted");
            Ok(Arc::new(MemoryRepo::new()))
        }
    }
}

async fn user_cmd(repo: Arc<dyn Repository>, cmd: UserCmd) -> Result<()> {
    match cmd {
        UserCmd::Add { name, email } => {
            let u = register_user(&*repo, &name, &email, Utc::now()).await?;
            let token = issue_token(&*repo, u.id).await?;
            println!("{}", u.id);
            println!("token: {token}");
        }
        UserCmd::Token { email } => {
            let u = find_user(&*repo, &email).await?;
            let token = issue_token(&*repo, u.id).await?;
            println!("{token}");
        }
        UserCmd::List => {
            let mut v = repo.list_users().await?;
            v.sort_by_key(|u| u.created_at);
            for u in v {
                println!("{}\t{}\t{}\txp={}\trep={}", u.id, u.name, u.email, u.xp, u.reputation);
            }
        }
    }
    Ok(())
}

async fn deck_cmd(repo: Arc<dyn Repository>, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add(a) => {
            let owner = find_user(&*repo, &a.owner).await?;
            let new = NewDeck {
                title: a.title,
                description: a.description,
                subject: a.subject,
                cards: Vec::new(),
            };
            let d = decks::create_deck(&*repo, owner.id, new, Utc::now()).await?;
            println!("{}", d.id);
        }
        DeckCmd::List { owner } => {
            let owner_id = match owner {
                Some(email) => Some(find_user(&*repo, &email).await?.id),
                None => None,
            };
            let now = Utc::now();
            let mut v = repo.list_decks(owner_id).await?;
            v.sort_by_key(|d| d.created_at);
            for d in v {
                let s = mastery_summary(&d, now);
                println!("{}\t{}\t{}\tcards={}\tdue={}", d.id, d.title, d.subject, s.total, s.due);
            }
        }
        DeckCmd::Show { deck } => {
            let d = resolve_deck(&*repo, &deck).await?;
            let s = mastery_summary(&d, Utc::now());
            println!("{} ({})", d.title, d.subject);
            if let Some(desc) = &d.description {
                println!("{desc}");
            }
            println!("cards={} due={} mean_level={:.2}", s.total, s.due, s.mean_level);
            for c in &d.cards {
                println!(
                    "{}\t{}\t{}\tlevel={}\tnext={}",
                    c.id,
                    c.question,
                    c.answer,
                    c.mastery_level,
                    c.next_review_at.to_rfc3339()
                );
            }
        }
        DeckCmd::Rm { deck } => {
            let d = resolve_deck(&*repo, &deck).await?;
            repo.delete_deck(d.id).await?;
            info!(deck_id = %d.id, "deck removed from the command line");
            println!("ok");
        }
    }
    Ok(())
}

async fn card_cmd(repo: Arc<dyn Repository>, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let deck = resolve_deck(&*repo, &a.deck).await?;
            let new = [NewCard {
                question: a.question,
                answer: a.answer,
            }];
            let d = decks::add_cards(&*repo, deck.created_by, deck.id, &new, Utc::now()).await?;
            let c = d.cards.last().ok_or_else(|| anyhow!("card was not stored"))?;
            println!("{}", c.id);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewKey {
    Rate(Confidence),
    Skip,
    Quit,
}

fn review_key(input: &str) -> Option<ReviewKey> {
    let input = input.trim().to_lowercase();
    let key = match input.as_str() {
        "1" => ReviewKey::Rate(Confidence::Again),
        "2" => ReviewKey::Rate(Confidence::Hard),
        "3" => ReviewKey::Rate(Confidence::Good),
        "4" => ReviewKey::Rate(Confidence::Easy),
        "s" | "skip" => ReviewKey::Skip,
        "q" | "quit" => ReviewKey::Quit,
        other => ReviewKey::Rate(other.parse().ok()?),
    };
    Some(key)
}

async fn review_cmd(repo: Arc<dyn Repository>, cmd: ReviewCmd) -> Result<()> {
    let deck = resolve_deck(&*repo, &cmd.deck).await?;
    let pool = due_cards(&deck, Utc::now());
    if pool.is_empty() {
        match next_due_at(&deck) {
            Some(at) => println!("no cards due; next review {}", at.to_rfc3339()),
            None => println!("no cards due"),
        }
        return Ok(());
    }

    let total = pool.len().min(cmd.max);
    let mut reviewed = 0usize;
    for (i, card) in pool.into_iter().take(cmd.max).enumerate() {
        println!("\n[{}/{}] level {}", i + 1, total, card.mastery_level);
        println!("Q: {}", card.question);
        prompt_enter("[enter=show]")?;
        println!("A: {}", card.answer);
        println!("[1=again, 2=hard, 3=good, 4=easy, s=skip, q=quit]");
        let key = loop {
            let line = read_line("rating> ")?;
            match review_key(&line) {
                Some(k) => break k,
                None => println!("enter 1/2/3/4, s, or q"),
            }
        };

        match key {
            ReviewKey::Quit => break,
            ReviewKey::Skip => continue,
            ReviewKey::Rate(confidence) => {
                let updated = decks::review_card(
                    &*repo,
                    deck.created_by,
                    deck.id,
                    card.id,
                    confidence.as_str(),
                    Utc::now(),
                )
                .await?;
                reviewed += 1;
                println!(
                    "→ level {}, next review {}",
                    updated.mastery_level,
                    updated.next_review_at.to_rfc3339()
                );
            }
        }
    }

    println!("\nreviewed {reviewed}");
    Ok(())
}

async fn export_cmd(repo: Arc<dyn Repository>, cmd: ExportCmd) -> Result<()> {
    match cmd {
        ExportCmd::Csv { path, deck } => {
            let d = resolve_deck(&*repo, &deck).await?;
            write_csv(&d, &path)?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

async fn import_cmd(repo: Arc<dyn Repository>, cmd: ImportCmd) -> Result<()> {
    match cmd {
        ImportCmd::Csv { path, owner, title } => {
            let owner = find_user(&*repo, &owner).await?;
            let title = match title {
                Some(t) => t,
                None => file_stem_title(&path)?,
            };
            let d = import_csv(&*repo, &owner, &title, &path, Utc::now()).await?;
            println!("imported {} card(s) into {}", d.cards.len(), d.id);
        }
    }
    Ok(())
}

async fn serve_cmd(repo: Arc<dyn Repository>, cmd: ServeCmd, config: Config) -> Result<()> {
    let addr: SocketAddr = match cmd.addr {
        Some(a) => a.parse().with_context(|| format!("invalid --addr {a}"))?,
        None => config.addr,
    };
    let state = AppState {
        identity: Arc::new(RepoIdentity::new(repo.clone())),
        repo,
    };
    api_server::run(state, addr, config.allowed_origins).await
}

// ===== CSV =====
struct ImportedCard {
    card: NewCard,
    mastery_level: u32,
    next_review_at: Option<DateTime<Utc>>,
}

fn write_csv(deck: &Deck, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(CSV_HEADER)?;
    for c in &deck.cards {
        wtr.write_record([
            c.question.clone(),
            c.answer.clone(),
            c.mastery_level.to_string(),
            c.next_review_at.to_rfc3339(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn parse_record(rec: &StringRecord, line: usize) -> Result<ImportedCard> {
    let question = rec.get(0).unwrap_or("").to_string();
    let answer = rec.get(1).unwrap_or("").to_string();
    let mastery_level = match rec.get(2).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .with_context(|| format!("line {line}: bad mastery_level {s:?}"))?,
        None => 0,
    };
    let next_review_at = match rec.get(3).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("line {line}: bad next_review_at {s:?}"))?
                .with_timezone(&Utc),
        ),
        None => None,
    };
    Ok(ImportedCard {
        card: NewCard { question, answer },
        mastery_level,
        next_review_at,
    })
}

async fn import_csv<R: Repository + ?Sized>(
    repo: &R,
    owner: &User,
    title: &str,
    path: &Path,
    now: DateTime<Utc>,
) -> Result<Deck> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        // header is line 1
        rows.push(parse_record(&rec?, i + 2)?);
    }

    let new = NewDeck {
        title: title.to_string(),
        cards: rows.iter().map(|r| r.card.clone()).collect(),
        ..Default::default()
    };
    let mut deck = decks::create_deck(repo, owner.id, new, now).await?;
    for (card, row) in deck.cards.iter_mut().zip(&rows) {
        card.mastery_level = row.mastery_level;
        if let Some(at) = row.next_review_at {
            card.next_review_at = at;
        }
    }
    Ok(repo.save_deck(&deck).await?)
}

fn file_stem_title(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("cannot derive a deck title from {}", path.display()))
}

// ===== Helpers =====
async fn find_user<R: Repository + ?Sized>(repo: &R, email: &str) -> Result<User> {
    match repo.find_user_by_email(email.trim()).await {
        Ok(u) => Ok(u),
        Err(CoreError::NotFound(_)) => bail!("no user with email {email}"),
        Err(e) => Err(e.into()),
    }
}

async fn resolve_deck<R: Repository + ?Sized>(repo: &R, sel: &str) -> Result<Deck> {
    if let Ok(id) = Uuid::parse_str(sel) {
        if let Ok(d) = repo.get_deck(id).await {
            return Ok(d);
        }
    }
    let decks = repo.list_decks(None).await?;
    if let Some(d) = decks.into_iter().find(|d| d.title.eq_ignore_ascii_case(sel.trim())) {
        return Ok(d);
    }
    bail!("deck not found: {}", sel)
}

fn prompt_enter(label: &str) -> Result<()> {
    read_line(label).map(|_| ())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    stdout().flush().ok();
    let mut s = String::new();
    if stdin().read_line(&mut s)? == 0 {
        bail!("input closed");
    }
    Ok(s)
}
