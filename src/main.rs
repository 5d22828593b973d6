use chrono::Utc;
use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::{
    cmp::Ordering,
    error::Error,
    fs::{self, File},
    io::{self, stdin},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use key_crusher::{
    app_dirs::AppDirs,
    challenge::{ChallengeEngine, Lifecycle, Mode, TICK_MS},
    clock::{Clock, SystemClock},
    config::{Config, ConfigStore, FileConfigStore},
    daily::{date_key, DailyChallenge, DAILY_COLLECTION, DAILY_WORD_COUNT},
    gateway::{DocumentGateway, PersistenceGateway},
    history,
    runtime::{spawn_terminal_reader, ChannelEventSource, FixedTicker, Runner},
    session::{Control, SaveStatus, Session},
    store::{DocumentStore, SqliteDocumentStore},
    summary::ChallengeSummary,
    words::{HttpWordSupply, WordBank, WordSupply},
};

const WORD_BANK: &str = "english";
const SAVE_GRACE: Duration = Duration::from_secs(3);

/// timed and daily typing challenges in the terminal
#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct Cli {
    /// play today's shared challenge instead of a timed one
    #[clap(long)]
    daily: bool,

    /// seconds a classic challenge lasts
    #[clap(short = 'd', long)]
    duration: Option<u64>,

    /// remote endpoint to fetch words from
    #[clap(long)]
    words_url: Option<String>,

    /// column at which the text wraps
    #[clap(long)]
    line_width: Option<u16>,

    /// name results are recorded under
    #[clap(long)]
    identity: Option<String>,

    /// persist the options above as the new defaults
    #[clap(long)]
    save: bool,

    /// print statistics over past challenges and exit
    #[clap(long)]
    history: bool,

    /// write past challenges as CSV to this file and exit
    #[clap(long)]
    export: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.daily {
            Mode::Daily
        } else {
            Mode::Classic
        }
    }

    fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.duration {
            config.classic_duration_secs = secs;
        }
        if let Some(url) = &self.words_url {
            config.word_supply_url = Some(url.clone());
        }
        if let Some(width) = self.line_width {
            config.line_width = width;
        }
        if let Some(identity) = &self.identity {
            config.identity = Some(identity.clone());
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    cli.apply(&mut config);
    if cli.save {
        config_store.save(&config)?;
    }
    init_logging()?;

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open_default()?);
    let gateway = DocumentGateway::new(
        Arc::clone(&store),
        config.identity.clone(),
        config.reference_utc_offset_minutes,
    );

    if cli.history || cli.export.is_some() {
        let summaries = gateway.summaries(cli.mode())?;
        if let Some(path) = &cli.export {
            history::export_csv(&summaries, File::create(path)?)?;
            println!("wrote {} challenges to {}", summaries.len(), path.display());
        }
        if cli.history {
            print_history(&history::summarize(&summaries));
        }
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let bank = WordBank::embedded(WORD_BANK)?.with_max_word_length(config.max_word_length);
    let clock = SystemClock::new();
    let engine = match cli.mode() {
        Mode::Classic => ChallengeEngine::new(config.classic_challenge(), clock),
        Mode::Daily => {
            let date = date_key(Utc::now(), config.reference_utc_offset_minutes);
            if gateway.has_daily_attempt(&date)? {
                println!("today's challenge ({date}) is already done, come back tomorrow");
                print_daily_averages(store.as_ref(), &date)?;
                return Ok(());
            }
            let daily = gateway.daily_challenge(&date, &bank, DAILY_WORD_COUNT)?;
            let words = daily.shuffled_words(&mut rand::thread_rng());
            let mut engine = ChallengeEngine::new(config.daily_challenge(), clock);
            engine.apply_words(engine.attempt(), &words);
            engine
        }
    };

    let words: Arc<dyn WordSupply> = match &config.word_supply_url {
        Some(url) => Arc::new(HttpWordSupply::new(url.clone(), config.max_word_length)?),
        None => Arc::new(bank),
    };

    let (tx, source) = ChannelEventSource::channel();
    let mut session = Session::new(
        engine,
        words,
        Arc::new(gateway),
        tx.clone(),
        config.line_width,
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    spawn_terminal_reader(tx);

    let runner = Runner::new(source, FixedTicker::new(Duration::from_millis(TICK_MS)));
    let result = run(&mut terminal, &runner, &mut session);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result?;

    // let a save that is still in flight land before exiting
    let deadline = Instant::now() + SAVE_GRACE;
    while matches!(session.save_status(), Some(SaveStatus::Pending)) && Instant::now() < deadline {
        let event = runner.step();
        session.handle(event);
    }

    if let Some(summary) = session.last_summary() {
        for line in summary_lines(summary) {
            println!("{line}");
        }
        if let Some(status) = session.save_status() {
            println!("{}", save_line(status));
        }
        if summary.mode == Mode::Daily {
            let date = date_key(summary.time.wall_clock.start, config.reference_utc_offset_minutes);
            print_daily_averages(store.as_ref(), &date)?;
        }
    }
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn Error>> {
    let Some(path) = AppDirs::log_path() else {
        return Ok(());
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = File::options().create(true).append(true).open(&path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    info!(log = %path.display(), "logging initialised");
    Ok(())
}

fn run<B: Backend, C: Clock>(
    terminal: &mut Terminal<B>,
    runner: &Runner<ChannelEventSource, FixedTicker>,
    session: &mut Session<C>,
) -> io::Result<()> {
    terminal.draw(|f| ui(session, f))?;
    loop {
        let before = session.engine().lifecycle();
        let event = runner.step();
        if session.handle(event) == Control::Quit {
            return Ok(());
        }
        // countdown ticks are measured from the moment the challenge begins
        if before == Lifecycle::NotStarted
            && session.engine().lifecycle() == Lifecycle::CountingDown
        {
            runner.rearm();
        }
        terminal.draw(|f| ui(session, f))?;
    }
}

fn ui<C: Clock>(session: &Session<C>, f: &mut Frame) {
    let engine = session.engine();
    let state = engine.state();
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines: Vec<Line> = Vec::new();

    match state.lifecycle {
        Lifecycle::NotStarted => {
            lines.push(Line::from("enter to start, tab for new words, esc to quit"));
        }
        Lifecycle::CountingDown => {
            lines.push(Line::styled(
                format!("starting in {}", state.countdown_remaining),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        }
        Lifecycle::Active => {
            let mut header = format!("{} wpm", engine.wpm());
            if let Some(remaining) = state.remaining_ms {
                header.push_str(&format!("   {}s left", remaining.div_ceil(1000)));
            }
            lines.push(Line::styled(header, dim));
            lines.push(Line::default());

            let (words, current) = session.current_line();
            let typed = session.input().text();
            let mut spans = Vec::new();
            for (i, word) in words.iter().enumerate() {
                let style = match i.cmp(&current) {
                    Ordering::Less => dim,
                    Ordering::Equal if word.starts_with(&typed) => {
                        Style::default().add_modifier(Modifier::UNDERLINED)
                    }
                    Ordering::Equal => Style::default()
                        .fg(Color::Red)
                        .add_modifier(Modifier::UNDERLINED),
                    Ordering::Greater => Style::default(),
                };
                spans.push(Span::styled(word.clone(), style));
                spans.push(Span::raw(" "));
            }
            lines.push(Line::from(spans));
            lines.push(Line::from(format!("> {typed}")));
        }
        Lifecycle::Ended => {
            if let Some(summary) = session.last_summary() {
                lines.extend(summary_lines(summary).into_iter().map(Line::from));
            }
            if let Some(status) = session.save_status() {
                lines.push(Line::styled(save_line(status), dim));
            }
            lines.push(Line::default());
            lines.push(Line::styled("tab to go again, esc to quit", dim));
        }
    }
    if let Some(error) = session.last_error() {
        lines.push(Line::default());
        lines.push(Line::styled(format!("! {error}"), Style::default().fg(Color::Yellow)));
    }

    let title = format!(" {} ", engine.mode()).to_lowercase();
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    f.render_widget(widget, f.area());
}

fn summary_lines(summary: &ChallengeSummary) -> Vec<String> {
    let metrics = &summary.telemetry.metrics;
    let mut lines = vec![
        format!("wpm       {}", summary.wpm),
        format!("accuracy  {}", percent(summary.accuracy())),
        format!(
            "avg key   {}",
            metrics
                .average_response_time_ms
                .map_or("-".to_string(), |ms| format!("{ms:.0}ms"))
        ),
        format!(
            "typed     {} chars in {} words",
            metrics.totals.characters, metrics.totals.words
        ),
    ];

    let mut slowest: Vec<_> = metrics.response_time_map.iter().collect();
    slowest.sort_by(|a, b| b.1.average_response_time_ms.total_cmp(&a.1.average_response_time_ms));
    if !slowest.is_empty() {
        let keys = slowest
            .iter()
            .take(5)
            .map(|(c, r)| format!("{c} {:.0}ms", r.average_response_time_ms))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("slowest   {keys}"));
    }
    lines
}

fn save_line(status: &SaveStatus) -> String {
    match status {
        SaveStatus::Pending => "saving...".to_string(),
        SaveStatus::Saved(at) => format!("saved to {}/{}", at.collection, at.key),
        SaveStatus::Failed(reason) => format!("not saved: {reason} (r to retry)"),
    }
}

fn percent(ratio: Option<f64>) -> String {
    ratio.map_or("-".to_string(), |r| format!("{:.1}%", r * 100.0))
}

fn print_history(report: &history::HistoryReport) {
    println!("attempts       {}", report.attempts);
    if report.attempts == 0 {
        return;
    }
    println!(
        "best wpm       {}",
        report.best_wpm.map_or("-".to_string(), |w| w.to_string())
    );
    println!(
        "mean wpm       {}",
        report.mean_wpm.map_or("-".to_string(), |w| format!("{w:.1}"))
    );
    println!(
        "wpm spread     {}",
        report.wpm_std_dev.map_or("-".to_string(), |sd| format!("{sd:.1}"))
    );
    println!("mean accuracy  {}", percent(report.mean_accuracy));
    for ch in report.characters.iter().take(10) {
        println!(
            "  {:>3}  {:>6.0}ms  ({} samples)",
            ch.character, ch.mean_response_time_ms, ch.samples
        );
    }
}

fn print_daily_averages(store: &dyn DocumentStore, date: &str) -> Result<(), Box<dyn Error>> {
    let Some(doc) = store.get(DAILY_COLLECTION, date)? else {
        return Ok(());
    };
    let daily: DailyChallenge = serde_json::from_value(doc)?;
    if let Some(avg) = daily.averages() {
        println!(
            "today's average over {} attempts: {:.0} wpm, {}, {:.1}s",
            daily.attempts,
            avg.wpm,
            percent(Some(avg.accuracy)),
            avg.time_ms / 1000.0
        );
    }
    Ok(())
}
