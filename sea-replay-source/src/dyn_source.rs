use crate::{
    format, ByteReader, CachedReader, CachedReaderOptions, FileReader, IterableSource,
    MemorySource, MessageCursor, MessageStream, RangeFetcher, SeaLogSource, SourceErr,
    SourceResult,
};
use sea_replay_types::{
    export::async_trait, AbortSignal, BackfillArgs, Initialization, MessageEvent,
    MessageIteratorArgs, Range, ReplayErr,
};
use std::{path::Path, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The formats this crate can read.
pub enum SourceFormat {
    SeaLog,
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    JsonLines,
}

/// A source of any supported format, resolved once when opened.
#[derive(Debug)]
pub enum DynSource {
    SeaLog(SeaLogSource),
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    JsonLines(crate::JsonLinesSource),
    Memory(MemorySource),
}

const SNIFF_SIZE: u64 = 64;

impl SourceFormat {
    /// Guesses the format from the first bytes of a file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if format::sniff(bytes) {
            return Some(Self::SeaLog);
        }
        #[cfg(feature = "json")]
        if bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map_or(false, |b| *b == b'{')
        {
            return Some(Self::JsonLines);
        }
        None
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for SourceFormat {
    type Err = SourceErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sealog" | "slg" => Ok(Self::SeaLog),
            #[cfg(feature = "json")]
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            _ => Err(SourceErr::UnknownFormat(s.to_owned())),
        }
    }
}

impl DynSource {
    /// Opens a source over `reader`, sniffing the format unless given.
    pub async fn open(
        reader: Arc<dyn ByteReader>,
        format: Option<SourceFormat>,
    ) -> SourceResult<Self> {
        let format = match format {
            Some(format) => format,
            None => {
                let head = reader
                    .read(Range::new(0, SNIFF_SIZE.min(reader.size())))
                    .await?;
                SourceFormat::sniff(&head).ok_or_else(|| {
                    ReplayErr::Backend(SourceErr::UnknownFormat(
                        "unrecognized leading bytes".to_owned(),
                    ))
                })?
            }
        };
        log::debug!("Opening {format:?} source");
        Ok(match format {
            SourceFormat::SeaLog => Self::SeaLog(SeaLogSource::from_shared(reader)),
            #[cfg(feature = "json")]
            SourceFormat::JsonLines => Self::JsonLines(crate::JsonLinesSource::from_shared(reader)),
        })
    }

    pub fn format(&self) -> Option<SourceFormat> {
        match self {
            Self::SeaLog(_) => Some(SourceFormat::SeaLog),
            #[cfg(feature = "json")]
            Self::JsonLines(_) => Some(SourceFormat::JsonLines),
            Self::Memory(_) => None,
        }
    }
}

/// Opens a local file. The format is sniffed from its first bytes, falling back to the
/// file extension.
pub async fn open_source(path: impl AsRef<Path>) -> SourceResult<DynSource> {
    let path = path.as_ref();
    let reader: Arc<dyn ByteReader> = Arc::new(FileReader::open(path).await?);
    let head = reader
        .read(Range::new(0, SNIFF_SIZE.min(reader.size())))
        .await?;
    let format = SourceFormat::sniff(&head)
        .or_else(|| SourceFormat::from_extension(path))
        .ok_or_else(|| {
            ReplayErr::Backend(SourceErr::UnknownFormat(path.display().to_string()))
        })?;
    DynSource::open(reader, Some(format)).await
}

/// Opens a remote resource through a [`CachedReader`].
pub async fn open_remote<F: RangeFetcher>(
    fetcher: F,
    options: CachedReaderOptions,
) -> SourceResult<DynSource> {
    let reader = CachedReader::new(fetcher, options).await?;
    DynSource::open(Arc::new(reader), None).await
}

#[async_trait]
impl IterableSource for DynSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        match self {
            Self::SeaLog(s) => s.initialize().await,
            #[cfg(feature = "json")]
            Self::JsonLines(s) => s.initialize().await,
            Self::Memory(s) => s.initialize().await,
        }
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        match self {
            Self::SeaLog(s) => s.message_iterator(args),
            #[cfg(feature = "json")]
            Self::JsonLines(s) => s.message_iterator(args),
            Self::Memory(s) => s.message_iterator(args),
        }
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        match self {
            Self::SeaLog(s) => s.get_backfill_messages(args, abort).await,
            #[cfg(feature = "json")]
            Self::JsonLines(s) => s.get_backfill_messages(args, abort).await,
            Self::Memory(s) => s.get_backfill_messages(args, abort).await,
        }
    }

    fn get_message_cursor(
        &self,
        args: MessageIteratorArgs,
        abort: Option<AbortSignal>,
    ) -> Box<dyn MessageCursor> {
        match self {
            Self::SeaLog(s) => s.get_message_cursor(args, abort),
            #[cfg(feature = "json")]
            Self::JsonLines(s) => s.get_message_cursor(args, abort),
            Self::Memory(s) => s.get_message_cursor(args, abort),
        }
    }
}
