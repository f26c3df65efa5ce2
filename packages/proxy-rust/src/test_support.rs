//! Recording test doubles for the router's collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use rpcgate_core::{
    AppException, MessageMetadata, MessageType, MetadataMatchCriteria, ProtocolType,
    TransportType,
};

use crate::config::{ProtocolOptionsConfig, RouteConfiguration};
use crate::route::RouteTable;
use crate::router::{CallRouter, RandomSource};
use crate::stats::{RouterCounter, RouterHistogram, StatsSink};
use crate::upstream::{
    Cancellable, CloseType, ClusterManager, ClusterView, CodecFactory, ConnectionId,
    ConnectionPool, ConnectionState, ConnectionStateTable, DecoderCallbacks, HostDescription,
    LoadBalancerContext, OutlierDetector, OutlierResult, PoolAcquire, PoolFailureReason,
    ResourcePriority, ResponseStatus, UpgradeResponse, UpstreamCodec, UpstreamConnection,
};

pub(crate) const HOST_ADDRESS: &str = "10.0.0.1:9090";

// ---------------------------------------------------------------------------
// Downstream
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct DownstreamLog {
    pub local_replies: Vec<(AppException, bool)>,
    pub downstream_resets: usize,
    pub continue_decoding: usize,
    pub response_started: Vec<(TransportType, ProtocolType)>,
    pub next_status: ResponseStatus,
    pub response_type: Option<MessageType>,
    pub response_success: bool,
}

impl Default for DownstreamLog {
    fn default() -> Self {
        Self {
            local_replies: Vec::new(),
            downstream_resets: 0,
            continue_decoding: 0,
            response_started: Vec::new(),
            next_status: ResponseStatus::MoreData,
            response_type: None,
            response_success: false,
        }
    }
}

impl DownstreamLog {
    /// Scripts what the downstream decoder reports for the next upstream bytes.
    pub fn respond_with(&mut self, status: ResponseStatus, kind: MessageType, success: bool) {
        self.next_status = status;
        self.response_type = Some(kind);
        self.response_success = success;
    }
}

pub(crate) struct RecordingCallbacks {
    log: Arc<Mutex<DownstreamLog>>,
    transport: TransportType,
    protocol: ProtocolType,
}

impl RecordingCallbacks {
    pub fn new(
        log: Arc<Mutex<DownstreamLog>>,
        transport: TransportType,
        protocol: ProtocolType,
    ) -> Self {
        Self {
            log,
            transport,
            protocol,
        }
    }
}

impl DecoderCallbacks for RecordingCallbacks {
    fn downstream_transport(&self) -> TransportType {
        self.transport
    }

    fn downstream_protocol(&self) -> ProtocolType {
        self.protocol
    }

    fn send_local_reply(&mut self, reply: AppException, end_stream: bool) {
        self.log.lock().local_replies.push((reply, end_stream));
    }

    fn reset_downstream_connection(&mut self) {
        self.log.lock().downstream_resets += 1;
    }

    fn continue_decoding(&mut self) {
        self.log.lock().continue_decoding += 1;
    }

    fn start_upstream_response(&mut self, transport: TransportType, protocol: ProtocolType) {
        self.log.lock().response_started.push((transport, protocol));
    }

    fn upstream_data(&mut self, data: &mut BytesMut) -> ResponseStatus {
        data.clear();
        self.log.lock().next_status
    }

    fn response_message_type(&self) -> Option<MessageType> {
        self.log.lock().response_type
    }

    fn response_success(&self) -> bool {
        self.log.lock().response_success
    }
}

// ---------------------------------------------------------------------------
// Stats and randomness
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct RecordingStats {
    counters: Mutex<Vec<(RouterCounter, Option<String>)>>,
    histograms: Mutex<Vec<(RouterHistogram, String, u64)>>,
}

impl RecordingStats {
    pub fn count(&self, counter: RouterCounter) -> usize {
        self.counters.lock().iter().filter(|(c, _)| *c == counter).count()
    }

    pub fn count_for(&self, counter: RouterCounter, cluster: &str) -> usize {
        self.counters
            .lock()
            .iter()
            .filter(|(c, name)| *c == counter && name.as_deref() == Some(cluster))
            .count()
    }

    pub fn histogram_samples(&self, histogram: RouterHistogram) -> Vec<u64> {
        self.histograms
            .lock()
            .iter()
            .filter(|(h, _, _)| *h == histogram)
            .map(|(_, _, value)| *value)
            .collect()
    }
}

impl StatsSink for RecordingStats {
    fn increment(&self, counter: RouterCounter, cluster: Option<&str>) {
        self.counters
            .lock()
            .push((counter, cluster.map(str::to_string)));
    }

    fn record(&self, histogram: RouterHistogram, cluster: &str, value: u64) {
        self.histograms
            .lock()
            .push((histogram, cluster.to_string(), value));
    }
}

#[derive(Debug, Default)]
pub(crate) struct FixedRandom(AtomicU64);

impl FixedRandom {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl RandomSource for FixedRandom {
    fn random(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Hosts, connections, pools
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct TestHost {
    outcomes: Mutex<Vec<OutlierResult>>,
}

impl TestHost {
    pub fn outcomes(&self) -> Vec<OutlierResult> {
        self.outcomes.lock().clone()
    }
}

impl OutlierDetector for TestHost {
    fn put_result(&self, result: OutlierResult) {
        self.outcomes.lock().push(result);
    }
}

impl HostDescription for TestHost {
    fn address(&self) -> String {
        HOST_ADDRESS.to_string()
    }

    fn outlier_detector(&self) -> &dyn OutlierDetector {
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionLog {
    writes: Vec<u8>,
    pub closes: Vec<CloseType>,
    pub released: bool,
}

impl ConnectionLog {
    pub fn written(&self) -> Vec<u8> {
        self.writes.clone()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

pub(crate) struct TestConnection {
    id: ConnectionId,
    log: Arc<Mutex<ConnectionLog>>,
}

impl UpstreamConnection for TestConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn write(&mut self, data: &mut BytesMut, _end_stream: bool) {
        self.log.lock().writes.extend_from_slice(data);
        data.clear();
    }

    fn close(&mut self, close_type: CloseType) {
        self.log.lock().closes.push(close_type);
    }
}

impl Drop for TestConnection {
    fn drop(&mut self) {
        self.log.lock().released = true;
    }
}

struct TestCancel(Arc<AtomicUsize>);

impl Cancellable for TestCancel {
    fn cancel(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PoolMode {
    Ready,
    Pending,
    Fail(PoolFailureReason),
}

/// Pool over a single physical connection (`ConnectionId(1)`).
pub(crate) struct TestPool {
    mode: PoolMode,
    host: Arc<TestHost>,
    log: Arc<Mutex<ConnectionLog>>,
    acquisitions: AtomicUsize,
    cancellations: Arc<AtomicUsize>,
}

impl TestPool {
    pub fn new(mode: PoolMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            host: Arc::new(TestHost::default()),
            log: Arc::new(Mutex::new(ConnectionLog::default())),
            acquisitions: AtomicUsize::new(0),
            cancellations: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn host(&self) -> Arc<TestHost> {
        Arc::clone(&self.host)
    }

    pub fn connection_log(&self) -> &Mutex<ConnectionLog> {
        &self.log
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Completes a pending acquisition.
    pub fn take_ready(&self) -> (Box<dyn UpstreamConnection>, Arc<dyn HostDescription>) {
        let host: Arc<dyn HostDescription> = self.host.clone();
        (self.connect(), host)
    }

    fn connect(&self) -> Box<dyn UpstreamConnection> {
        Box::new(TestConnection {
            id: ConnectionId(1),
            log: Arc::clone(&self.log),
        })
    }
}

impl ConnectionPool for TestPool {
    fn new_connection(&self) -> PoolAcquire {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            PoolMode::Ready => PoolAcquire::Ready {
                connection: self.connect(),
                host: self.host.clone(),
            },
            PoolMode::Pending => {
                PoolAcquire::Pending(Box::new(TestCancel(Arc::clone(&self.cancellations))))
            }
            PoolMode::Fail(reason) => PoolAcquire::Failed { reason, host: None },
        }
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

type SeenContext = (Option<MetadataMatchCriteria>, Vec<(String, String)>);

pub(crate) struct TestCluster {
    name: String,
    maintenance: bool,
    options: Option<ProtocolOptionsConfig>,
    pool: Option<Arc<TestPool>>,
    last_lb: Mutex<Option<SeenContext>>,
}

impl TestCluster {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            maintenance: false,
            options: None,
            pool: None,
            last_lb: Mutex::new(None),
        }
    }

    pub fn with_pool(mut self, pool: Arc<TestPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn in_maintenance(mut self) -> Self {
        self.maintenance = true;
        self
    }

    pub fn with_options(mut self, options: ProtocolOptionsConfig) -> Self {
        self.options = Some(options);
        self
    }

    /// Criteria and headers passed with the last pool request.
    pub fn last_lb_context(&self) -> Option<SeenContext> {
        self.last_lb.lock().clone()
    }
}

impl ClusterView for TestCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn maintenance_mode(&self) -> bool {
        self.maintenance
    }

    fn protocol_options(&self) -> Option<ProtocolOptionsConfig> {
        self.options
    }

    fn tcp_conn_pool(
        &self,
        _priority: ResourcePriority,
        context: &LoadBalancerContext<'_>,
    ) -> Option<Arc<dyn ConnectionPool>> {
        let headers = context
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        *self.last_lb.lock() = Some((context.metadata_match.cloned(), headers));
        self.pool
            .as_ref()
            .map(|pool| Arc::clone(pool) as Arc<dyn ConnectionPool>)
    }
}

#[derive(Default)]
pub(crate) struct TestClusterManager {
    clusters: HashMap<String, Arc<TestCluster>>,
}

impl TestClusterManager {
    pub fn new(clusters: Vec<TestCluster>) -> Self {
        Self {
            clusters: clusters
                .into_iter()
                .map(|c| (c.name.clone(), Arc::new(c)))
                .collect(),
        }
    }

    pub fn cluster(&self, name: &str) -> Option<Arc<TestCluster>> {
        self.clusters.get(name).cloned()
    }
}

impl ClusterManager for TestClusterManager {
    fn get_cluster(&self, name: &str) -> Option<Arc<dyn ClusterView>> {
        self.cluster(name).map(|c| c as Arc<dyn ClusterView>)
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Text codec: `[begin <method> <seq>;<body>;end]`. Upgrades send
/// `upgrade?` and complete once a reply ending in `!` arrives.
pub(crate) struct TestCodec {
    transport: TransportType,
    protocol: ProtocolType,
}

struct TestUpgrade {
    seen: Vec<u8>,
}

impl UpgradeResponse for TestUpgrade {
    fn on_data(&mut self, data: &mut BytesMut) -> bool {
        self.seen.extend_from_slice(data);
        data.clear();
        self.seen.ends_with(b"!")
    }
}

impl UpstreamCodec for TestCodec {
    fn transport(&self) -> TransportType {
        self.transport
    }

    fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    fn attempt_upgrade(
        &mut self,
        state: &ConnectionState,
        buffer: &mut BytesMut,
    ) -> Option<Box<dyn UpgradeResponse>> {
        if state.is_upgraded() {
            return None;
        }
        buffer.extend_from_slice(b"upgrade?");
        Some(Box::new(TestUpgrade { seen: Vec::new() }))
    }

    fn complete_upgrade(&mut self, state: &ConnectionState, _response: &mut dyn UpgradeResponse) {
        state.mark_upgraded();
    }

    fn write_message_begin(&mut self, metadata: &MessageMetadata, buffer: &mut BytesMut) {
        buffer.extend_from_slice(
            format!("begin {} {};", metadata.method_name(), metadata.sequence_id).as_bytes(),
        );
    }

    fn write_body(&mut self, body: &[u8], buffer: &mut BytesMut) {
        buffer.extend_from_slice(body);
        buffer.extend_from_slice(b";");
    }

    fn write_message_end(&mut self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(b"end");
    }

    fn encode_frame(
        &mut self,
        _metadata: &MessageMetadata,
        message: &mut BytesMut,
        out: &mut BytesMut,
    ) {
        out.extend_from_slice(b"[");
        out.extend_from_slice(&message.split());
        out.extend_from_slice(b"]");
    }
}

#[derive(Debug, Default)]
pub(crate) struct TestCodecFactory;

impl CodecFactory for TestCodecFactory {
    fn create(&self, transport: TransportType, protocol: ProtocolType) -> Box<dyn UpstreamCodec> {
        Box::new(TestCodec {
            transport,
            protocol,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A `CallRouter` wired to recording collaborators.
pub(crate) struct Harness {
    pub router: CallRouter,
    pub downstream: Arc<Mutex<DownstreamLog>>,
    pub stats: Arc<RecordingStats>,
    pub connection_states: Arc<ConnectionStateTable>,
    clusters: Arc<TestClusterManager>,
    random: Arc<FixedRandom>,
}

impl Harness {
    pub fn new(config: &RouteConfiguration, clusters: Vec<TestCluster>) -> Self {
        Self::with_downstream(config, clusters, TransportType::Framed, ProtocolType::Binary)
    }

    pub fn with_downstream(
        config: &RouteConfiguration,
        clusters: Vec<TestCluster>,
        transport: TransportType,
        protocol: ProtocolType,
    ) -> Self {
        let downstream = Arc::new(Mutex::new(DownstreamLog::default()));
        let stats = Arc::new(RecordingStats::default());
        let connection_states = Arc::new(ConnectionStateTable::new());
        let clusters = Arc::new(TestClusterManager::new(clusters));
        let random = Arc::new(FixedRandom::default());

        let router = CallRouter::new(
            Arc::new(RouteTable::from_config(config).unwrap()),
            clusters.clone(),
            Arc::new(TestCodecFactory),
            stats.clone(),
            connection_states.clone(),
            random.clone(),
            Box::new(RecordingCallbacks::new(
                Arc::clone(&downstream),
                transport,
                protocol,
            )),
        );

        Self {
            router,
            downstream,
            stats,
            connection_states,
            clusters,
            random,
        }
    }

    pub fn with_random(self, value: u64) -> Self {
        self.random.set(value);
        self
    }

    pub fn cluster(&self, name: &str) -> Arc<TestCluster> {
        self.clusters.cluster(name).unwrap()
    }
}
