use std::path::Path;
use std::sync::Arc;

use flexi_logger::{
    colored_opt_format, Age, Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming,
};
use log::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::segmentizer::{Segmentizer, SegmentizerConfig};
use crate::sink::SegmentSink;
use crate::source::{self, ExitReason, PacketSource};
use crate::utils::queue;
use crate::utils::stats::{Collector, Countable, RefCountable, StatsOption};

// Wires the ingestion pipeline: packet source, segmentizer and segment
// sink connected by bounded queues, with a stats collector looking over
// all of them.
pub struct Agent {
    source: Arc<PacketSource>,
    segmentizer: Arc<Segmentizer>,
    sink: Arc<SegmentSink>,
    stats: Arc<Collector>,
    _logger: LoggerHandle,
}

impl Agent {
    pub fn new(config_path: &dyn AsRef<Path>, input_override: Option<String>) -> Result<Agent> {
        let mut config = if config_path.as_ref().exists() {
            Config::load_from_file(config_path)?
        } else {
            Config::default()
        };
        if let Some(input) = input_override {
            config.input = input;
        }
        if config.input.is_empty() {
            return Err(Error::InvalidInput("no input configured".into()));
        }

        let logger = init_logger(&config)?;
        info!("==================== Launching flowcap agent ====================");
        if !config_path.as_ref().exists() {
            warn!(
                "config file {} not found, using defaults",
                config_path.as_ref().display()
            );
        }

        let (event_sender, event_receiver) = queue::bounded(config.event_queue_size);
        let (output_sender, output_receiver) = queue::bounded(config.segment_queue_size);
        let stats = Arc::new(Collector::new(config.stats_interval));

        let event_queue_counter: Arc<dyn RefCountable> = event_sender.counter();
        stats.register_countable(
            "event-queue",
            Countable::Ref(Arc::downgrade(&event_queue_counter)),
            vec![],
        );
        let output_queue_counter: Arc<dyn RefCountable> = output_sender.counter();
        stats.register_countable(
            "segment-queue",
            Countable::Ref(Arc::downgrade(&output_queue_counter)),
            vec![],
        );

        let source = Arc::new(PacketSource::new(
            source::Options {
                input: config.input.clone(),
                cutoff: config.cutoff,
                max_flows: config.max_flows,
                max_age: config.max_age,
                expire_interval: config.expire_interval,
                pseudo_realtime: config.pseudo_realtime,
            },
            event_sender,
        ));
        let source_counter: Arc<dyn RefCountable> = source.counter();
        stats.register_countable(
            "source",
            Countable::Ref(Arc::downgrade(&source_counter)),
            vec![StatsOption::Tag("input", config.input.clone())],
        );

        let segmentizer = Arc::new(Segmentizer::new(
            SegmentizerConfig {
                max_events_per_chunk: config.max_events_per_chunk,
                max_segment_size: config.max_segment_size,
            },
            event_receiver,
            output_sender,
        ));
        let segmentizer_counter: Arc<dyn RefCountable> = segmentizer.counter();
        stats.register_countable(
            "segmentizer",
            Countable::Ref(Arc::downgrade(&segmentizer_counter)),
            vec![],
        );

        let sink = Arc::new(SegmentSink::new(output_receiver));
        let sink_counter: Arc<dyn RefCountable> = sink.counter();
        stats.register_countable(
            "sink",
            Countable::Ref(Arc::downgrade(&sink_counter)),
            vec![],
        );

        Ok(Agent {
            source,
            segmentizer,
            sink,
            stats,
            _logger: logger,
        })
    }

    pub fn start(&self) {
        self.stats.start();
        self.sink.start();
        self.segmentizer.start();
        self.source.start();
        info!("agent started");
    }

    // Stops the pipeline upstream first so queued events drain through the
    // segmentizer and sink before their threads are joined.
    pub fn stop(&self) -> ExitReason {
        let reason = self.source.stop();
        self.segmentizer.stop();
        self.sink.stop();
        self.stats.stop();
        info!("agent stopped");
        reason
    }

    pub fn source_finished(&self) -> bool {
        self.source.is_finished()
    }
}

fn init_logger(config: &Config) -> Result<LoggerHandle> {
    let logger = Logger::try_with_str(config.log_level.as_str().to_lowercase())?;
    let handle = if config.log_file.is_empty() {
        logger.log_to_stderr().start()?
    } else {
        logger
            .format_for_files(colored_opt_format)
            .log_to_file(FileSpec::try_from(&config.log_file)?)
            .rotate(Criterion::Age(Age::Day), Naming::Timestamps, Cleanup::Never)
            .create_symlink(&config.log_file)
            .append()
            .start()?
    };
    Ok(handle)
}
