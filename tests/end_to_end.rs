// Parcours complets client ↔ serveur : poignée de main, enrôlement,
// identification, redémarrage du service, transport socket.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use biomatch_he::net::{read_frame, write_frame, Envelope, TcpTransport};
use biomatch_he::storage::{ByteStore, EmbeddingStore, MemoryEmbeddingStore, MemoryStore};
use biomatch_he::{
    ClientSession, CryptoError, HeParams, LocalTransport, LshParams, MatchingService, Scheme,
    Settings,
};

const ALICE: [f64; 4] = [1.0, 2.0, -1.0, 0.5];
const BOB: [f64; 4] = [-3.0, 0.25, 2.0, -1.0];

fn settings(scheme: Scheme) -> Settings {
    Settings {
        encryption_strategy: scheme,
        ckks: HeParams {
            poly_modulus_degree: 2048,
            coeff_mod_bit_sizes: vec![30, 24],
            plain_modulus:       None,
            global_scale_bits:   Some(30),
            integer_scale:       None,
        },
        bfv: HeParams {
            poly_modulus_degree: 2048,
            coeff_mod_bit_sizes: vec![54],
            plain_modulus:       Some(65537),
            global_scale_bits:   None,
            integer_scale:       Some(100),
        },
        hashing: LshParams { n_dimensions: 4, n_tables: 3, n_projections: 2 },
        ..Settings::default()
    }
}

struct Server {
    blobs:      Arc<dyn ByteStore>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl Server {
    fn new() -> Self {
        Server {
            blobs:      Arc::new(MemoryStore::new()),
            embeddings: Arc::new(MemoryEmbeddingStore::new()),
        }
    }

    /// Nouvelle instance du service sur les mêmes magasins (simule un redémarrage)
    fn start(&self, settings: Settings) -> Arc<MatchingService> {
        Arc::new(MatchingService::new(settings, self.blobs.clone(), self.embeddings.clone()).unwrap())
    }
}

fn session(
    settings: &Settings,
    client_store: &Arc<dyn ByteStore>,
    service: &Arc<MatchingService>,
    identity: &str,
) -> ClientSession<LocalTransport> {
    ClientSession::open(
        &settings.client_config(),
        client_store.clone(),
        LocalTransport::new(service.clone(), identity),
    )
    .unwrap()
}

fn l1(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn assert_alice_identified(client: &mut ClientSession<LocalTransport>, tolerance: f64) {
    let ranked = client.identify(&ALICE, 2).unwrap();
    assert!(!ranked.is_empty());
    let (best_distance, best_id) = ranked[0];
    assert_eq!(best_id, 1);
    assert!(best_distance < tolerance, "distance {best_distance}");
    if let Some(&(distance, id)) = ranked.get(1) {
        assert_eq!(id, 2);
        assert!((distance - l1(&ALICE, &BOB)).abs() < tolerance);
    }
}

#[test]
fn test_ckks_enroll_and_identify() {
    let settings = settings(Scheme::Ckks);
    let server = Server::new();
    let service = server.start(settings.clone());
    let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let mut client = session(&settings, &client_store, &service, "alice");

    client.handshake().unwrap();
    client.ingest(1, &ALICE, false).unwrap();
    client.ingest(2, &BOB, true).unwrap();

    assert_alice_identified(&mut client, 1e-2);
}

#[test]
fn test_bfv_enroll_and_identify() {
    let settings = settings(Scheme::Bfv);
    let server = Server::new();
    let service = server.start(settings.clone());
    let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let mut client = session(&settings, &client_store, &service, "bob");

    client.handshake().unwrap();
    client.enroll(&[(1, ALICE.to_vec()), (2, BOB.to_vec())]).unwrap();

    // Arithmétique exacte au pas de 1/100 près
    assert_alice_identified(&mut client, 1e-9);
}

#[test]
fn test_state_survives_service_restart() {
    let settings = settings(Scheme::Ckks);
    let server = Server::new();
    let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());

    {
        let service = server.start(settings.clone());
        let mut client = session(&settings, &client_store, &service, "carol");
        client.handshake().unwrap();
        client.enroll(&[(1, ALICE.to_vec()), (2, BOB.to_vec())]).unwrap();
    }

    // Nouveau service et nouvelle session : contexte, modèle et seaux rechargés
    let service = server.start(settings.clone());
    let mut client = session(&settings, &client_store, &service, "carol");
    assert_alice_identified(&mut client, 1e-2);
}

#[test]
fn test_identities_are_isolated() {
    let settings = settings(Scheme::Ckks);
    let server = Server::new();
    let service = server.start(settings.clone());

    let alice_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let mut alice = session(&settings, &alice_store, &service, "alice");
    alice.handshake().unwrap();
    alice.ingest(1, &ALICE, true).unwrap();

    // Dave n'a jamais fait sa poignée de main
    let dave_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let mut dave = session(&settings, &dave_store, &service, "dave");
    assert_eq!(dave.identify(&ALICE, 1), Err(CryptoError::UninitializedContext));
}

#[test]
fn test_scheme_mismatch_rejected_at_handshake() {
    let server = Server::new();
    let service = server.start(settings(Scheme::Ckks));
    let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let bfv = settings(Scheme::Bfv);
    let mut client = session(&bfv, &client_store, &service, "erin");

    assert!(matches!(client.handshake(), Err(CryptoError::ContextMismatch(_))));
}

#[test]
fn test_no_shared_bucket_yields_empty_result() {
    let settings = settings(Scheme::Ckks);
    let server = Server::new();
    let service = server.start(settings.clone());
    let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
    let mut client = session(&settings, &client_store, &service, "frank");

    client.handshake().unwrap();
    client.ingest(1, &ALICE, true).unwrap();

    // Le point opposé tombe dans le seau complémentaire de chaque table
    let opposite: Vec<f64> = ALICE.iter().map(|v| -v).collect();
    assert!(client.identify(&opposite, 3).unwrap().is_empty());
}

#[test]
fn test_tcp_transport_round_trip() {
    let settings = settings(Scheme::Ckks);
    let server = Server::new();
    let service = server.start(settings.clone());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        while let Some(envelope) = read_frame::<_, Envelope>(&mut stream).unwrap() {
            let response = service.handle(&envelope.identity, envelope.request);
            write_frame(&mut stream, &response).unwrap();
        }
    });

    {
        let client_store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let transport = TcpTransport::connect(addr, "gina").unwrap();
        let mut client =
            ClientSession::open(&settings.client_config(), client_store, transport).unwrap();
        client.handshake().unwrap();
        client.enroll(&[(7, ALICE.to_vec())]).unwrap();
        let ranked = client.identify(&ALICE, 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].1, 7);
    }

    // Fermeture du client → fin de boucle propre côté serveur
    handle.join().unwrap();
}
