mod util;

use sea_replay_source::{
    open_remote, open_source, CachedReader, CachedReaderOptions, IterableSource, SourceErr,
    SourceFormat,
};
use sea_replay_types::{
    topics, IteratorResult, MessageIteratorArgs, Problem, ReplayErr, Severity, Time,
};
use std::{sync::atomic::Ordering, time::Duration};
use util::*;

static INIT: std::sync::Once = std::sync::Once::new();

fn options() -> CachedReaderOptions {
    let mut options = CachedReaderOptions::default();
    options
        .set_max_request_size(4096)
        .set_continue_threshold(256)
        .set_retry_backoff(Duration::from_millis(1));
    options
}

// cargo test --test remote --features=test,runtime-tokio -- --nocapture
#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn flaky_connection() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let bytes = sealog(&messages("remote", "/gps", 1, 300), 256);
    let fetcher = FlakyFetcher::new(bytes, 2, 100);
    let fetches = fetcher.fetches.clone();
    let mut source = open_remote(fetcher, options()).await?;
    assert_eq!(source.format(), Some(SourceFormat::SeaLog));

    let init = source.initialize().await?;
    assert_eq!(init.num_messages(), 300);
    assert_eq!(init.end, Time::new(300, 0));

    let items: Vec<IteratorResult> = {
        use sea_replay_types::export::futures::StreamExt;
        source
            .message_iterator(MessageIteratorArgs::new(topics(["/gps"])))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?
    };
    let count = items.iter().filter(|i| i.message_event().is_some()).count();
    assert_eq!(count, 300);
    // two broken connections, each retried
    assert!(fetches.load(Ordering::SeqCst) >= 3);
    // and each reported once, as a warning
    let retried: Vec<&Problem> = init
        .problems
        .iter()
        .chain(items.iter().filter_map(|i| match i {
            IteratorResult::Problem(problem) => Some(problem),
            _ => None,
        }))
        .filter(|p| p.message.starts_with("Fetch failed"))
        .collect();
    assert_eq!(retried.len(), 2);
    assert!(retried.iter().all(|p| p.severity == Severity::Warn));

    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn give_up() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    use sea_replay_source::ByteReader;
    use sea_replay_types::Range;

    let bytes = sealog(&messages("remote", "/gps", 1, 100), 256);
    let mut options = options();
    options.set_max_retries(2);
    let reader = CachedReader::new(FlakyFetcher::new(bytes.clone(), 10, 0), options).await?;
    let err = reader.read(Range::new(0, 1000)).await.unwrap_err();
    assert!(matches!(err, ReplayErr::Disconnected(_)));
    assert!(sea_replay_source::is_transient(&err));
    assert!(!sea_replay_source::is_fatal(&err));

    // a later read tries again, and the fetcher has recovered by then
    let mut bytes_read = Vec::new();
    for _ in 0..10 {
        match reader.read(Range::new(0, 1000)).await {
            Ok(b) => {
                bytes_read = b;
                break;
            }
            Err(ReplayErr::Disconnected(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    assert_eq!(bytes_read, bytes[..1000].to_vec());

    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn local_file() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let path = temp_file("local_file.sealog");
    std::fs::write(&path, sealog(&messages("local", "/imu", 10, 40), 128))?;
    let mut source = open_source(&path).await?;
    let init = source.initialize().await?;
    assert_eq!(init.start, Time::new(10, 0));
    assert_eq!(init.topic("/imu").unwrap().schema_name.as_deref(), Some("std_msgs/String"));

    let mut cursor = source.get_message_cursor(
        MessageIteratorArgs::new(topics(["/imu"]))
            .start(Time::new(20, 0))
            .end(Time::new(29, 0)),
        None,
    );
    let batch = cursor.read_until(Time::new(25, 0)).await?.unwrap();
    let events: Vec<_> = batch.iter().filter_map(|i| i.message_event()).collect();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0].message.as_str()?, "local:20");
    let mut rest = 0;
    while let Some(batch) = cursor.next_batch(100).await? {
        rest += batch.iter().filter(|i| i.message_event().is_some()).count();
    }
    assert_eq!(rest, 4);
    cursor.close().await;

    std::fs::remove_file(&path)?;

    let path = temp_file("local_file.bin");
    std::fs::write(&path, b"not a recording")?;
    assert!(matches!(
        open_source(&path).await,
        Err(ReplayErr::Backend(SourceErr::UnknownFormat(_)))
    ));
    std::fs::remove_file(&path)?;

    Ok(())
}
