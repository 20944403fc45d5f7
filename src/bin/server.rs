//! biomatch-server : serveur de correspondance biométrique chiffrée
//!
//! Ne voit que des contextes publics, des chiffrés et des clés de seau LSH.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use biomatch_he::net::{read_frame, write_frame, Envelope};
use biomatch_he::{MatchingService, Settings};

#[derive(Parser)]
#[command(name = "biomatch-server")]
#[command(about = "Serveur de correspondance biométrique sur données chiffrées")]
#[command(version)]
struct Args {
    /// Fichier de configuration JSON (sinon valeurs par défaut + environnement)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Adresse d'écoute (remplace SERVER_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Répertoire des blobs (remplace DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Une connexion : suite de requêtes jusqu'à fermeture par le client
fn serve_connection(service: &MatchingService, mut stream: TcpStream) -> biomatch_he::Result<()> {
    while let Some(envelope) = read_frame::<_, Envelope>(&mut stream)? {
        let response = service.handle(&envelope.identity, envelope.request);
        write_frame(&mut stream, &response)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let mut settings =
        Settings::load(args.config.as_deref()).wrap_err("configuration invalide")?;
    if let Some(bind) = args.bind {
        settings.server_addr = bind;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }

    info!("biomatch-server");
    info!("Répertoire des données : {}", settings.data_dir.display());
    info!("Schéma par défaut : {}", settings.encryption_strategy);
    info!("Capacité du cache d'identités : {}", settings.cache_capacity);

    let addr = settings.server_addr.clone();
    let service = Arc::new(MatchingService::open(settings).wrap_err("ouverture du service")?);
    let listener = TcpListener::bind(&addr)
        .wrap_err_with(|| format!("impossible d'écouter sur {addr}"))?;
    info!("En écoute sur {addr}");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let service = service.clone();
                let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
                debug!(%peer, "connexion acceptée");
                thread::spawn(move || {
                    if let Err(e) = serve_connection(&service, stream) {
                        warn!(%peer, error = %e, "connexion interrompue");
                    }
                });
            }
            Err(e) => warn!(error = %e, "connexion refusée"),
        }
    }

    service.flush()?;
    Ok(())
}
