mod util;

use sea_replay_source::{
    IterableSource, MemoryReader, MultiSource, SeaLogSource, WorkerSource,
};
use sea_replay_types::{topics, BackfillArgs, IteratorResult, MessageIteratorArgs, Time};
use util::*;

static INIT: std::sync::Once = std::sync::Once::new();

fn sources() -> Vec<Box<dyn IterableSource>> {
    vec![
        Box::new(SeaLogSource::new(MemoryReader::new(sealog(
            &messages("first", "/a", 0, 10),
            64,
        )))),
        Box::new(SeaLogSource::new(MemoryReader::new(sealog(
            &messages("second", "/a", 5, 15),
            64,
        )))),
    ]
}

// cargo test --test merge --features=test,runtime-tokio -- --nocapture
#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn overlapping_sources() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut source = MultiSource::new(sources());
    let init = source.initialize().await?;
    assert_eq!(init.start, Time::new(0, 0));
    assert_eq!(init.end, Time::new(15, 0));
    assert_eq!(init.topic_stats["/a"].num_messages, 22);

    let mut cursor = source.get_message_cursor(MessageIteratorArgs::new(topics(["/a"])), None);
    let mut payloads = Vec::new();
    let mut last = Time::ZERO;
    while let Some(batch) = cursor.next_batch(5).await? {
        for item in batch {
            let time = item.time().expect("every item has a time");
            assert!(time >= last, "{time} is before {last}");
            last = time;
            if let IteratorResult::MessageEvent(event) = item {
                payloads.push(event.message.as_str()?.to_owned());
            }
        }
    }
    assert_eq!(payloads.len(), 22);
    assert_eq!(&payloads[..5], &["first:0", "first:1", "first:2", "first:3", "first:4"]);
    // equal times go to the first source
    assert_eq!(&payloads[5..7], &["first:5", "second:5"]);
    assert_eq!(&payloads[15..17], &["first:10", "second:10"]);
    assert_eq!(payloads[21], "second:15");

    let backfill = source
        .get_backfill_messages(
            BackfillArgs {
                topics: topics(["/a"]),
                time: Time::new(12, 0),
            },
            None,
        )
        .await?;
    assert_eq!(backfill.len(), 1);
    assert_eq!(backfill[0].message.as_str()?, "second:12");

    Ok(())
}

#[cfg(any(feature = "test", feature = "runtime-tokio"))]
#[cfg_attr(feature = "runtime-tokio", tokio::test)]
#[cfg_attr(all(feature = "runtime-async-std", feature = "test"), async_std::test)]
async fn merge_in_worker() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut source = WorkerSource::new(MultiSource::new(sources()));
    source.set_read_ahead(4);
    source.initialize().await?;

    let mut cursor = source.get_message_cursor(
        MessageIteratorArgs::new(topics(["/a"])).start(Time::new(9, 0)),
        None,
    );
    let mut seen = Vec::new();
    for end in [9, 10, 10, 14, 20] {
        if let Some(batch) = cursor.read_until(Time::new(end, 0)).await? {
            for item in batch {
                assert!(item.time().unwrap() <= Time::new(end, 0));
                if let IteratorResult::MessageEvent(event) = item {
                    seen.push(event.message.as_str()?.to_owned());
                }
            }
        }
    }
    assert_eq!(
        seen,
        [
            "first:9", "second:9", "first:10", "second:10", "second:11", "second:12",
            "second:13", "second:14", "second:15"
        ]
    );
    assert_eq!(cursor.read_until(Time::MAX).await?, None);

    Ok(())
}
