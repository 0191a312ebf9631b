use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cnpj_enricher::batch::{BatchOrchestrator, BatchSettings, PerformanceReport};
use cnpj_enricher::cnpj;
use cnpj_enricher::config::EnricherConfig;
use cnpj_enricher::http::build_http_client;
use cnpj_enricher::providers::build_chain;
use cnpj_enricher::proxy::{ProxyManager, ProxyState};
use cnpj_enricher::rate_limit::RateLimiter;
use cnpj_enricher::resolver::EnrichmentResolver;
use cnpj_enricher::scrape::browser::{BrowserPool, BrowserSettings};
use cnpj_enricher::scrape::{ContactField, PageSource, ScrapeEngine};
use cnpj_enricher::store::ResumeStore;

const EXIT_INTERRUPTED: u8 = 130;
const EXIT_FATAL: u8 = 2;
const EXIT_CHECK_FAILED: u8 = 1;

fn start_chromedriver() -> Result<()> {
    info!("Attempting to start ChromeDriver...");
    let status = Command::new("sh")
        .arg("start.chromedriver.sh")
        .status()
        .context("Failed to execute start.chromedriver.sh script.")?;

    if !status.success() {
        bail!("ChromeDriver script failed to execute successfully. Please check chromedriver.log.");
    }
    info!("ChromeDriver script executed. Check logs for status.");
    Ok(())
}

fn load_config() -> Result<EnricherConfig> {
    EnricherConfig::from_env().context("Invalid configuration")
}

fn browser_pool(config: &EnricherConfig, proxy: &ProxyManager, limiter: &Arc<RateLimiter>) -> Arc<BrowserPool> {
    Arc::new(BrowserPool::new(
        BrowserSettings::from_config(config, proxy),
        Arc::clone(limiter),
    ))
}

#[derive(Parser)]
#[command(name = "cnpj-enricher")]
#[command(about = "CNPJ contact enrichment CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich every pending identifier of the input file (default)
    Run {
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Dispatch identifiers a previous run recorded as errors again
        #[arg(long, default_value_t = false)]
        retry_errors: bool,

        #[arg(long, default_value_t = false)]
        start_chromedriver: bool,
    },

    /// Run every lookup site for one identifier and print what each yields
    TestScraping {
        #[arg(default_value = "07134405000161")]
        cnpj: String,

        #[arg(long, default_value_t = false)]
        start_chromedriver: bool,
    },

    /// Check WebDriver, output files and proxy
    CheckInstallation {
        #[arg(long, default_value_t = false)]
        start_chromedriver: bool,
    },

    /// Load and validate the configuration without processing anything
    ValidateConfig,
}

async fn run_enrichment(
    input: Option<PathBuf>,
    retry_errors: bool,
    with_chromedriver: bool,
) -> Result<ExitCode> {
    let mut config = load_config()?;
    if let Some(input) = input {
        config.input_file = input;
    }

    let raw = std::fs::read_to_string(&config.input_file)
        .with_context(|| format!("Failed to read input file {}", config.input_file.display()))?;
    let lines: Vec<String> = raw.lines().map(str::to_string).collect();

    if with_chromedriver {
        start_chromedriver()?;
    }

    let proxy = Arc::new(ProxyManager::from_config(&config));
    let limiter = Arc::new(RateLimiter::new(
        config.requests_per_second,
        config.rate_limit_burst,
    ));
    let http = build_http_client(&proxy, config.connection_timeout, config.request_timeout)?;
    let providers = build_chain(&config, http, Arc::clone(&limiter));

    let pool = config
        .enable_scraping
        .then(|| browser_pool(&config, &proxy, &limiter));
    let scraper = pool.as_ref().map(|pool| {
        let pages: Arc<dyn PageSource> = pool.clone();
        Arc::new(ScrapeEngine::new(pages, config.scrape_timeout))
    });

    let resolver = Arc::new(EnrichmentResolver::new(providers, scraper));
    info!(
        "Providers: {:?}, scraping {}",
        resolver.provider_names(),
        if resolver.scraping_enabled() { "enabled" } else { "disabled" }
    );

    let store = Arc::new(ResumeStore::open(
        &config.result_file,
        &config.done_file,
        &config.error_file,
    )?);
    let orchestrator = BatchOrchestrator::new(
        resolver,
        store,
        BatchSettings::from_config(&config, retry_errors),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️  Interrupt received, finishing decided work and stopping...");
            signal_cancel.cancel();
        }
    });

    let monitor_stop = cancel.child_token();
    if proxy.url().is_some() {
        proxy.check_now().await;
    }
    let monitor = proxy.spawn_monitor(monitor_stop.clone());

    let outcome = orchestrator.run(&lines, cancel.clone()).await;

    monitor_stop.cancel();
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }
    if let Some(pool) = &pool {
        pool.shutdown().await;
    }

    let summary = outcome?;
    PerformanceReport::new(&summary).display();

    if summary.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn test_scraping(raw: &str, with_chromedriver: bool) -> Result<ExitCode> {
    let config = load_config()?;
    let id = cnpj::validate(raw).with_context(|| format!("{:?} is not a valid CNPJ", raw))?;

    if with_chromedriver {
        start_chromedriver()?;
    }

    let proxy = ProxyManager::from_config(&config);
    let limiter = Arc::new(RateLimiter::new(
        config.requests_per_second,
        config.rate_limit_burst,
    ));
    let pool = browser_pool(&config, &proxy, &limiter);
    let pages: Arc<dyn PageSource> = pool.clone();
    let engine = ScrapeEngine::new(pages, config.scrape_timeout);

    println!("🔍 Scraping diagnostics for {} ({})", id, id.formatted());
    println!();
    for report in engine.diagnose(&id).await {
        println!("Site #{} ({})", report.position, report.site);
        println!("  URL:   {}", report.url);
        match &report.fetch {
            Ok(bytes) => println!("  Fetch: ✅ {} bytes", bytes),
            Err(reason) => println!("  Fetch: ❌ {}", reason),
        }
        println!("  Phone: {}", report.phone.as_deref().unwrap_or("-"));
        println!("  Email: {}", report.email.as_deref().unwrap_or("-"));
    }

    println!();
    println!("Per-field pass:");
    for field in [ContactField::Phone, ContactField::Email] {
        let scrape = engine.scrape_field(&id, field).await;
        match scrape.hit() {
            Some((value, attempt)) => println!(
                "  {}: ✅ {} (site #{} {})",
                field, value, attempt.position, attempt.site
            ),
            None => println!("  {}: ❌ not found on {} site(s)", field, scrape.attempts.len()),
        }
    }

    pool.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn check_installation(with_chromedriver: bool) -> Result<ExitCode> {
    let config = load_config()?;
    let mut failures = 0;

    if with_chromedriver {
        start_chromedriver()?;
    }

    println!("🔧 Checking installation...");

    let proxy = ProxyManager::from_config(&config);
    if config.enable_scraping {
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_second,
            config.rate_limit_burst,
        ));
        match browser_pool(&config, &proxy, &limiter).probe().await {
            Ok(()) => println!("  ✅ WebDriver reachable at {}", config.webdriver_url),
            Err(e) => {
                failures += 1;
                println!("  ❌ WebDriver at {}: {:#}", config.webdriver_url, e);
            }
        }
    } else {
        println!("  ⏭️  WebDriver not needed, scraping disabled");
    }

    for path in [&config.result_file, &config.done_file, &config.error_file] {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(_) => println!("  ✅ {} is writable", path.display()),
            Err(e) => {
                failures += 1;
                println!("  ❌ {} is not writable: {}", path.display(), e);
            }
        }
    }

    if config.input_file.is_file() {
        println!("  ✅ Input file {} found", config.input_file.display());
    } else {
        println!("  ⚠️  Input file {} not found", config.input_file.display());
    }

    if config.proxy_url.is_some() {
        let health = proxy.check_now().await;
        match health.state {
            ProxyState::Connected => println!(
                "  ✅ Proxy connected, egress IP {}",
                health.egress_ip.as_deref().unwrap_or("unknown")
            ),
            _ => {
                failures += 1;
                println!(
                    "  ❌ Proxy unreachable: {}",
                    health.detail.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    if failures == 0 {
        println!("✅ Installation looks good");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ {} check(s) failed", failures);
        Ok(ExitCode::from(EXIT_CHECK_FAILED))
    }
}

fn validate_config() -> ExitCode {
    match EnricherConfig::from_env() {
        Ok(config) => {
            println!("✅ Configuration is valid\n");
            config.print_summary();
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("❌ {}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::from_filename("config.env").ok();
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run {
        input: None,
        retry_errors: false,
        start_chromedriver: false,
    });

    let result = match command {
        Commands::Run {
            input,
            retry_errors,
            start_chromedriver,
        } => run_enrichment(input, retry_errors, start_chromedriver).await,
        Commands::TestScraping {
            cnpj,
            start_chromedriver,
        } => test_scraping(&cnpj, start_chromedriver).await,
        Commands::CheckInstallation { start_chromedriver } => {
            check_installation(start_chromedriver).await
        }
        Commands::ValidateConfig => Ok(validate_config()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
