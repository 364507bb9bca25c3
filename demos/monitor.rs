//! Watch every player on a server and print what they report
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.50
//! RUST_LOG=squeezebox_lms=debug cargo run --example monitor -- 192.168.1.50 9000 9090
//! ```

use squeezebox_lms::{
    Command, DeviceEvent, DeviceSession, RequestClient, ServerConfig, SessionOptions, Tag, Topic,
    TopicCommand,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("squeezebox_lms=info".parse()?),
        )
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let mut config = ServerConfig::new(host);
    if let Some(http) = args.next() {
        config.ports.http = http.parse()?;
    }
    if let Some(cli) = args.next() {
        config.ports.cli = cli.parse()?;
    }
    let options = SessionOptions::default();

    let server = RequestClient::new(&config, &options, tracing::Span::none())?;
    let players = server.players().await?;
    println!("{} player(s) on {}", players.result.count, config.host);

    let mut devices = Vec::new();
    for player in &players.result.players_loop {
        println!("  {} ({}, {})", player.name, player.modelname, player.playerid);

        let device = DeviceSession::for_player(player, config.clone(), options)?;
        match device.status().await {
            Ok(status) => println!("    {:?}", status),
            Err(e) => println!("    status unavailable: {}", e),
        }

        let mut events = device.connect().await?;
        let status_tags = [Tag::Volume, Tag::PlayerState, Tag::PlayMode];
        device
            .subscribe_topics(vec![
                TopicCommand::once(Command::status_subscription(0, status_tags)),
                TopicCommand::on(Topic::PlaylistNewsong, Command::status_subscription(0, status_tags)),
                TopicCommand::on(Topic::FavoritesChanged, Command::favorites_items(0, 100)),
            ])
            .await?;

        let name = player.name.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    DeviceEvent::Status(status) => println!(
                        "[{}] volume={} mute={} power={} mode={}",
                        name, status.volume, status.mute, status.active, status.mode
                    ),
                    DeviceEvent::Favorites(favorites) => {
                        println!("[{}] {} favorite(s)", name, favorites.data.count)
                    }
                    DeviceEvent::Subscription(subscription) => println!(
                        "[{}] {} successful={}",
                        name,
                        subscription.channel,
                        subscription.is_successful()
                    ),
                    DeviceEvent::SessionLost => println!("[{}] session lost", name),
                }
            }
        });
        devices.push(device);
    }

    tokio::signal::ctrl_c().await?;
    for device in &devices {
        device.disconnect().await;
    }
    Ok(())
}
