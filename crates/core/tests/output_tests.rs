use luminet_core::{decode, LightingConsole, Settings, ShowStore, UniverseConfig, PACKET_LEN};
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

fn settings_for(listener: &UdpSocket) -> Settings {
    Settings {
        broadcast_ip: "127.0.0.1".to_string(),
        artnet_port: listener.local_addr().unwrap().port(),
        ..Settings::default()
    }
}

/// Reads frames until one satisfies `done`, returning it.
async fn frame_where(
    listener: &UdpSocket,
    done: impl Fn(u16, &[u8]) -> bool,
) -> (u16, Vec<u8>) {
    let mut buf = [0u8; 1024];
    loop {
        let (len, _) = timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("no Art-Net frame arrived")
            .unwrap();
        assert_eq!(len, PACKET_LEN);
        let packet = decode(&buf[..len]).unwrap();
        let levels = packet.levels();
        if done(packet.universe, &levels) {
            return (packet.universe, levels.to_vec());
        }
    }
}

#[tokio::test]
async fn test_writes_reach_the_wire() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let settings = Settings {
        universe: 3,
        ..settings_for(&listener)
    };
    let mut console = LightingConsole::new(settings, ShowStore::in_memory());
    console.initialize().await.unwrap();

    // Startup frame carries the whole (dark) universe.
    let (universe, levels) = frame_where(&listener, |_, _| true).await;
    assert_eq!(universe, 3);
    assert_eq!(levels.len(), 512);
    assert!(levels.iter().all(|v| *v == 0));

    console.set_channel(1, 255.0).await.unwrap();
    console.set_channel(512, 7.0).await.unwrap();
    let (_, levels) = frame_where(&listener, |_, l| l[511] == 7).await;
    assert_eq!(levels[0], 255);

    console.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_moves_output_to_new_universe() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut console = LightingConsole::new(settings_for(&listener), ShowStore::in_memory());
    console.initialize().await.unwrap();
    frame_where(&listener, |universe, _| universe == 0).await;

    console.set_channel(2, 80.0).await.unwrap();
    console
        .update_universe_config(UniverseConfig::new(9, "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(console.universe_config().universe, 9);

    // The last frame is resent on the new universe without another write.
    let (_, levels) = frame_where(&listener, |universe, _| universe == 9).await;
    assert_eq!(levels[1], 80);

    assert!(console
        .update_universe_config(UniverseConfig::new(40000, "not-an-ip"))
        .await
        .is_err());
    assert_eq!(console.universe_config().universe, 9);

    console.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_after_write_burst() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut console = LightingConsole::new(settings_for(&listener), ShowStore::in_memory());
    console.initialize().await.unwrap();

    for value in 0..100 {
        console.set_channel(1, value as f64).await.unwrap();
    }
    console
        .update_universe_config(UniverseConfig::new(9, "127.0.0.1"))
        .await
        .unwrap();
    console.set_channel(2, 42.0).await.unwrap();

    let (universe, levels) = frame_where(&listener, |_, l| l[1] == 42).await;
    assert_eq!(universe, 9);
    assert_eq!(levels[0], 99);

    console.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_values_survive_restart() {
    let dir = TempDir::new().unwrap();
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut console = LightingConsole::new(
        settings_for(&listener),
        ShowStore::open(dir.path()).unwrap(),
    );
    console.initialize().await.unwrap();
    console.set_channel(10, 42.0).await.unwrap();
    console.set_channel(11, 43.0).await.unwrap();
    assert_eq!(console.current_values().await.unwrap()[9], 42);
    console.shutdown().await.unwrap();

    let store = ShowStore::open(dir.path()).unwrap();
    let saved = store.load_dmx_values().expect("values were not persisted");
    assert_eq!((saved[9], saved[10]), (42, 43));

    let mut console = LightingConsole::new(settings_for(&listener), store);
    console.initialize().await.unwrap();
    let values = console.current_values().await.unwrap();
    assert_eq!((values[9], values[10]), (42, 43));
    console.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persisted_universe_config_wins_over_settings() {
    let dir = TempDir::new().unwrap();
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let console = LightingConsole::new(
        settings_for(&listener),
        ShowStore::open(dir.path()).unwrap(),
    );
    console
        .update_universe_config(UniverseConfig::new(12, "127.0.0.1"))
        .await
        .unwrap();

    let console = LightingConsole::new(
        settings_for(&listener),
        ShowStore::open(dir.path()).unwrap(),
    );
    assert_eq!(console.universe_config().universe, 12);

    let overridden = console.with_universe_config(UniverseConfig::new(4, "127.0.0.1"));
    assert_eq!(overridden.universe_config().universe, 4);
    let reopened = ShowStore::open(dir.path()).unwrap();
    assert_eq!(reopened.load_universe_config().unwrap().universe, 12);
}
