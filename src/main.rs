use std::io;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;
use crate::{
    dns::gandi::GandiProvider,
    gateway::{livebox::LiveboxResolver, WanIpSource},
    settings::{LogFormat, Settings, SettingsError},
    updater::Updater,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

mod dns;
mod gateway;
mod settings;
mod updater;

#[derive(Debug, Clone, Copy)]
enum AppExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AppExitCode> for ExitCode {
    fn from(code: AppExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cfg = match Settings::new() {
        Ok(cfg) => cfg,
        Err(SettingsError::InvalidArgs(e)) => {
            let _ = e.print();
            return AppExitCode::ConfigError.into();
        }
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return AppExitCode::ConfigError.into();
        }
    };

    if let Err(e) = init_logging(&cfg) {
        eprintln!("failed to set up logging: {}", e);
        return AppExitCode::ConfigError.into();
    }

    run(cfg).await.into()
}

fn init_logging(cfg: &Settings) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let builder = FmtSubscriber::builder().with_max_level(cfg.log_level.level());

    match cfg.log_format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    }
}

async fn run(cfg: Settings) -> AppExitCode {
    let mut provider = match GandiProvider::new(cfg.api_url.clone(), &cfg.api_token) {
        Ok(provider) => provider,
        Err(e) => {
            error!("invalid Gandi configuration: {}", e);
            return AppExitCode::ConfigError;
        }
    };
    *provider.dry_run_mut() = cfg.dry_run;
    if *provider.dry_run() {
        warn!("dry run, the updated records will not be pushed to Gandi");
    }

    let resolver = match cfg.custom_ip {
        Some(ip) => {
            info!(%ip, "using the configured WAN IP instead of the Livebox");
            WanIpSource::Fixed(ip)
        }
        None => match LiveboxResolver::new(cfg.gateway_url.clone()) {
            Ok(livebox) => WanIpSource::Livebox(livebox),
            Err(e) => {
                error!("invalid Livebox URL: {}", e);
                return AppExitCode::ConfigError;
            }
        },
    };

    let mut updater = Updater::new(provider, resolver, cfg.domains.clone());
    *updater.record_types_mut() = cfg.record_types.clone();
    *updater.fail_fast_mut() = cfg.fail_fast;

    if !cfg.daemon {
        return match updater.run_once().await {
            Ok(report) if report.is_success() => AppExitCode::Success,
            Ok(_) => AppExitCode::RuntimeError,
            Err(e) => {
                error!("{}", e);
                AppExitCode::RuntimeError
            }
        };
    }

    info!(
        domains = ?cfg.domains,
        interval = %humantime::format_duration(cfg.interval),
        "starting in daemon mode"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                info!("received {}", signal);
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("failed to listen for shutdown signals: {}", e),
        }
    });

    match updater.run(cfg.interval, shutdown_rx).await {
        Ok(()) => AppExitCode::Success,
        Err(e) => {
            error!("{}", e);
            AppExitCode::RuntimeError
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
