mod util;

use sea_replay_player::{Player, PlayerErr, PlayerOptions};
use sea_replay_runtime::{sleep, timeout};
use sea_replay_source::{MemorySource, SeaLogWriter, SourceErr};
use sea_replay_types::{topics, PlayerPresence, ReplayErr, Severity, Time};
use std::time::Duration;
use util::*;

static INIT: std::sync::Once = std::sync::Once::new();

const TIMEOUT: Duration = Duration::from_secs(10);

// cargo test --test playback --features=test,runtime-tokio -- --nocapture
#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn play_to_end() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let all = messages(&["/a", "/b"], 1, 10);
    let player = Player::new(MemorySource::new(all.clone()), fast());
    let states = player.subscribe(1024)?;
    player.play()?;

    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    // every message exactly once, in order
    assert_eq!(payloads(&delivered(&seen)), payloads(&all));
    let last = seen.last().unwrap();
    assert_eq!(last.presence, PlayerPresence::Present);
    assert!(!last.is_playing());
    assert_eq!(last.current_time(), Some(Time::new(10, 0)));
    assert_eq!(
        last.progress.fully_loaded_fraction_ranges,
        vec![(0.0, 1.0)]
    );
    let active = last.active_data.as_ref().unwrap();
    assert_eq!(active.start_time, Time::new(1, 0));
    assert_eq!(active.end_time, Time::new(10, 0));
    assert_eq!(active.topics.len(), 2);
    assert_eq!(active.last_seek_time, 0);
    assert_eq!(
        active.total_bytes_received,
        all.iter().map(|m| m.size_in_bytes as u64).sum::<u64>()
    );

    // playing at the end starts over
    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(payloads(&delivered(&seen)), payloads(&all));

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn seek_and_play_until() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut all = messages(&["/a"], 1, 10);
    all.insert(1, message("/b", 1));
    all.insert(6, message("/b", 5));
    let player = Player::new(MemorySource::new(all), fast());
    let states = player.subscribe(1024)?;

    let initial = states.recv_async().await?;
    assert_eq!(initial.presence, PlayerPresence::Present);
    assert_eq!(initial.current_time(), Some(Time::new(1, 0)));
    assert!(initial.messages().is_empty());

    player.seek(Time::new(6, 500_000_000))?;
    let seeked = states.recv_async().await?;
    assert_eq!(payloads(seeked.messages()), ["/b:5", "/a:6"]);
    assert_eq!(seeked.current_time(), Some(Time::new(6, 500_000_000)));
    assert_eq!(seeked.active_data.as_ref().unwrap().last_seek_time, 1);
    assert!(!seeked.is_playing());

    player.play_until(Time::new(8, 0))?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(payloads(&delivered(&seen)), ["/a:7", "/a:8"]);
    let last = seen.last().unwrap();
    assert_eq!(last.current_time(), Some(Time::new(8, 0)));
    assert!(!last.is_playing());

    // seeking past the end is clamped
    player.seek(Time::new(100, 0))?;
    let seeked = states.recv_async().await?;
    assert_eq!(seeked.current_time(), Some(Time::new(10, 0)));
    assert_eq!(payloads(seeked.messages()), ["/b:5", "/a:10"]);

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn pause_and_resume() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let all = messages(&["/a"], 1, 20);
    let mut options = fast();
    options.set_speed(20.0);
    let player = Player::new(MemorySource::new(all.clone()), options);
    let states = player.subscribe(1024)?;
    player.play()?;

    let mut received = Vec::new();
    let mut paused_at = None;
    while let Ok(state) = states.recv_async().await {
        received.extend(state.messages().iter().cloned());
        if paused_at.is_none() && !received.is_empty() {
            player.pause()?;
            paused_at = state.current_time();
        }
        if paused_at.is_some() && !state.is_playing() {
            break;
        }
    }
    let before = received.len();
    assert!(before < all.len());

    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    received.extend(delivered(&seen));
    assert_eq!(payloads(&received), payloads(&all));

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn change_subscriptions() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut options = fast();
    options.set_topics(topics(["/a"]));
    let player = Player::new(MemorySource::new(messages(&["/a", "/b"], 1, 10)), options);
    let states = player.subscribe(1024)?;
    player.play_until(Time::new(5, 0))?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(
        payloads(&delivered(&seen)),
        ["/a:1", "/a:2", "/a:3", "/a:4", "/a:5"]
    );

    // the new topic is backfilled at the current time
    player.set_subscriptions(topics(["/a", "/b"]))?;
    let resubscribed = states.recv_async().await?;
    let mut backfill = payloads(resubscribed.messages());
    backfill.sort();
    assert_eq!(backfill, ["/a:5", "/b:5"]);
    assert_eq!(resubscribed.current_time(), Some(Time::new(5, 0)));
    assert_eq!(resubscribed.active_data.as_ref().unwrap().last_seek_time, 1);

    player.play_until(Time::new(7, 0))?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    let mut played = payloads(&delivered(&seen));
    played.sort();
    assert_eq!(played, ["/a:6", "/a:7", "/b:6", "/b:7"]);

    // dropping a topic stops it at once
    player.set_subscriptions(topics(["/b"]))?;
    let resubscribed = states.recv_async().await?;
    assert_eq!(payloads(resubscribed.messages()), ["/b:7"]);
    player.play_until(Time::new(8, 0))?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(payloads(&delivered(&seen)), ["/b:8"]);

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn out_of_order_alert() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let unsorted = vec![
        message("/a", 1),
        message("/a", 3),
        message("/a", 2),
        message("/a", 4),
    ];
    let player = Player::new(MemorySource::new(unsorted), fast());
    let states = player.subscribe(1024)?;
    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(payloads(&delivered(&seen)), ["/a:1", "/a:3", "/a:4"]);
    let last = seen.last().unwrap();
    assert_eq!(last.alerts.len(), 1);
    assert_eq!(last.alerts[0].severity, Severity::Warn);
    assert_eq!(last.alerts[0].topic.as_deref(), Some("/a"));

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn reconnect() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let all = messages(&["/a"], 1, 20);
    let player = Player::new(FlakySource::new(all.clone(), 2, 5), fast());
    let states = player.subscribe(1024)?;
    player.play()?;

    let mut seen = Vec::new();
    while seen.len() < 1000 {
        let more = timeout(TIMEOUT, play_through(&states)).await?;
        let done = more.last().map_or(true, |s| {
            s.current_time() == Some(Time::new(20, 0)) || s.presence == PlayerPresence::Error
        });
        seen.extend(more);
        if done {
            break;
        }
    }
    assert!(seen
        .iter()
        .any(|s| s.presence == PlayerPresence::Reconnecting));
    let last = seen.last().unwrap();
    assert_eq!(last.presence, PlayerPresence::Present);
    // nothing lost, nothing twice
    assert_eq!(payloads(&delivered(&seen)), payloads(&all));

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn give_up_reconnecting() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut options = fast();
    options.set_reconnect_attempts(2);
    let player = Player::new(
        FlakySource::new(messages(&["/a"], 1, 10), u32::MAX, 0),
        options,
    );
    let states = player.subscribe(1024)?;
    player.play()?;

    let mut last = None;
    while let Ok(state) = timeout(TIMEOUT, states.recv_async()).await? {
        let failed = state.presence == PlayerPresence::Error;
        last = Some(state);
        if failed {
            break;
        }
    }
    let last = last.unwrap();
    assert_eq!(last.presence, PlayerPresence::Error);
    assert_eq!(last.alerts.last().unwrap().severity, Severity::Error);
    assert!(last.messages().is_empty());

    // commands are accepted but ignored
    player.play()?;
    player.seek(Time::new(5, 0))?;
    player.set_speed(2.0)?;
    let state = states.recv_async().await?;
    assert_eq!(state.presence, PlayerPresence::Error);
    assert_eq!(state.active_data.as_ref().unwrap().speed, 2.0);

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn init_failure() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut options = PlayerOptions::default();
    options.set_name("broken");
    let player = Player::new(BrokenSource, options);
    let states = player.subscribe(1)?;
    let state = states.recv_async().await?;
    assert_eq!(state.presence, PlayerPresence::Error);
    assert_eq!(state.name.as_deref(), Some("broken"));
    assert!(state.active_data.is_none());
    assert_eq!(state.alerts.len(), 1);
    assert_eq!(state.alerts[0].severity, Severity::Error);

    let path = std::env::temp_dir().join(format!("{}-garbage.bin", std::process::id()));
    std::fs::write(&path, b"definitely not a recording")?;
    match Player::open(&path, PlayerOptions::default()).await {
        Err(ReplayErr::Backend(PlayerErr::SourceErr(SourceErr::UnknownFormat(_)))) => (),
        other => panic!("unexpected {other:?}"),
    }
    std::fs::remove_file(&path)?;

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn commands_after_close() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let player = Player::new(MemorySource::new(messages(&["/a"], 1, 3)), fast());
    assert!(matches!(
        player.set_speed(0.0),
        Err(ReplayErr::Backend(PlayerErr::InvalidSpeed(_)))
    ));
    assert!(matches!(
        player.set_speed(f64::NAN),
        Err(ReplayErr::Backend(PlayerErr::InvalidSpeed(_)))
    ));
    player.set_speed(3.0)?;
    let states = player.subscribe(1)?;
    let state = states.recv_async().await?;
    assert_eq!(state.active_data.as_ref().unwrap().speed, 3.0);

    let other = player.clone();
    player.close().await?;
    assert_eq!(other.state().await.presence, PlayerPresence::NotPresent);
    assert!(matches!(
        other.play(),
        Err(ReplayErr::Backend(PlayerErr::Closed))
    ));
    assert!(matches!(
        other.close().await,
        Err(ReplayErr::Backend(PlayerErr::Closed))
    ));
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn stalled_listener() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    // a listener that never reads does not hold up close
    let player = Player::new(
        MemorySource::new(messages(&["/a"], 1, 1000)),
        PlayerOptions::default(),
    );
    let stalled = player.subscribe(1)?;
    player.play()?;
    sleep(Duration::from_millis(100)).await;
    player.pause()?;
    timeout(Duration::from_secs(3), player.close()).await??;
    assert!(matches!(
        player.play(),
        Err(ReplayErr::Backend(PlayerErr::Closed))
    ));
    drop(stalled);

    // nor playback, once it has been unsubscribed
    let mut options = fast();
    options.set_listener_timeout(Duration::from_millis(50));
    let all = messages(&["/a"], 1, 10);
    let player = Player::new(MemorySource::new(all.clone()), options);
    let stalled = player.subscribe(1)?;
    let states = player.subscribe(1024)?;
    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(payloads(&delivered(&seen)), payloads(&all));
    assert!(stalled.is_disconnected());
    assert!(stalled.len() <= 1);

    player.close().await?;
    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn play_files() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut paths = Vec::new();
    for (name, topic) in [("first", "/a"), ("second", "/b")] {
        let path = std::env::temp_dir().join(format!("{}-{name}.sealog", std::process::id()));
        let mut writer = SeaLogWriter::new(Vec::new(), Default::default())?;
        for message in messages(&[topic], 1, 5) {
            writer.write(&message)?;
        }
        std::fs::write(&path, writer.finish()?)?;
        paths.push(path);
    }

    let player = Player::open(&paths[0], fast()).await?;
    let states = player.subscribe(1024)?;
    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    assert_eq!(
        payloads(&delivered(&seen)),
        payloads(&messages(&["/a"], 1, 5))
    );
    player.close().await?;

    let player = Player::open_all(&paths, fast()).await?;
    let states = player.subscribe(1024)?;
    player.play()?;
    let seen = timeout(TIMEOUT, play_through(&states)).await?;
    // equal times go to the file given first
    assert_eq!(
        payloads(&delivered(&seen)),
        payloads(&messages(&["/a", "/b"], 1, 5))
    );
    player.close().await?;

    for path in paths {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
