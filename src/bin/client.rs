//! biomatch-client : détient la clé secrète et les embeddings en clair
//!
//! Sous-commandes : poignée de main, enrôlement en masse, identification.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use biomatch_he::net::TcpTransport;
use biomatch_he::storage::{ByteStore, FileStore};
use biomatch_he::{ClientSession, Settings};

#[derive(Parser)]
#[command(name = "biomatch-client")]
#[command(about = "Client de correspondance biométrique chiffrée")]
#[command(version)]
struct Args {
    /// Fichier de configuration JSON (sinon valeurs par défaut + environnement)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Adresse du serveur (remplace SERVER_ADDR)
    #[arg(long)]
    server: Option<String>,

    /// Identité présentée au serveur
    #[arg(long, default_value = "default")]
    identity: String,

    /// Répertoire local des clés et du modèle LSH (remplace DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Envoie le contexte public et les paramètres d'index au serveur
    Handshake,
    /// Chiffre et envoie une liste JSON [{"id": .., "embedding": [..]}]
    Enroll {
        #[arg(long)]
        input: PathBuf,
    },
    /// Cherche les identifiants les plus proches d'un embedding JSON [..]
    Identify {
        #[arg(long)]
        embedding: PathBuf,
        #[arg(long, default_value_t = 1)]
        top: usize,
    },
}

#[derive(Deserialize)]
struct EnrollItem {
    id:        u64,
    embedding: Vec<f64>,
}

#[derive(Serialize)]
struct Match {
    id:       u64,
    distance: f64,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).wrap_err_with(|| format!("ouverture de {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("JSON invalide dans {}", path.display()))
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
    if let Some(server) = args.server {
        settings.server_addr = server;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }

    let store: Arc<dyn ByteStore> = Arc::new(FileStore::open(&settings.data_dir)?);
    let transport = TcpTransport::connect(settings.server_addr.as_str(), args.identity.as_str())
        .wrap_err_with(|| format!("connexion à {}", settings.server_addr))?;
    let mut session = ClientSession::open(&settings.client_config(), store, transport)?;

    match args.command {
        Command::Handshake => {
            session.handshake()?;
            info!("Contexte public et paramètres d'index transmis");
        }
        Command::Enroll { input } => {
            let items: Vec<EnrollItem> = read_json(&input)?;
            let items: Vec<(u64, Vec<f64>)> =
                items.into_iter().map(|i| (i.id, i.embedding)).collect();
            session.enroll(&items)?;
            info!("{} embedding(s) enrôlé(s)", items.len());
        }
        Command::Identify { embedding, top } => {
            let embedding: Vec<f64> = read_json(&embedding)?;
            let matches: Vec<Match> = session
                .identify(&embedding, top)?
                .into_iter()
                .map(|(distance, id)| Match { id, distance })
                .collect();
            if matches.is_empty() {
                info!("Aucun candidat ne partage de seau avec cet embedding");
            }
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
    }
    Ok(())
}
