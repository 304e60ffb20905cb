//! Gateway sub-device protocol
//!
//! A [`Gateway`] represents logical sub-devices behind one [`Connection`]. It
//! publishes online/offline device-list reports on `{topic_root}/event` and
//! registers a [`GatewayInterceptor`] that consumes operation results arriving
//! under `$gateway/operation/result/` before generic message delivery.

pub mod directory;

pub use directory::{SubDevice, SubdevKey, SubdevStatus, SubdeviceDirectory};

use crate::connection::{Connection, Interception, MessageInterceptor};
use crate::error::{LinkError, LinkResult, Status};
use crate::protocol::messages::{Classify, DeviceRecord, GatewayMessage, GatewayOperation, GatewayResult};
use crate::protocol::topics::{validate_identifier, GatewayTopics, GATEWAY_RESULT_PREFIX};
use crate::transport::Message;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Descriptive fields of the gateway's own direct-device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayProfile {
    pub name: String,
    pub device_type: String,
    pub manufacturer: String,
    /// Root of the event topic; defaults to `{product_id}/{device_name}`
    pub topic_root: Option<String>,
}

impl GatewayProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: "gateway".to_string(),
            manufacturer: String::new(),
            topic_root: None,
        }
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn with_topic_root(mut self, topic_root: impl Into<String>) -> Self {
        self.topic_root = Some(topic_root.into());
        self
    }
}

/// Consumes `$gateway/operation/result/{product_id}/{device_name}` traffic
pub struct GatewayInterceptor {
    prefixes: Vec<String>,
    result_topic: String,
    directory: Arc<Mutex<SubdeviceDirectory>>,
    subscribed: AtomicBool,
}

impl GatewayInterceptor {
    pub fn new(result_topic: String, directory: Arc<Mutex<SubdeviceDirectory>>) -> Self {
        Self {
            prefixes: vec![GATEWAY_RESULT_PREFIX.to_string()],
            result_topic,
            directory,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Whether the result topic subscription is currently active
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn apply_result(&self, product_id: &str, device_name: &str, result: &GatewayResult) {
        let mut directory = self.directory.lock();
        match (&result.operation, result.is_success()) {
            (GatewayOperation::Online, true) => {
                directory.set_status(product_id, device_name, SubdevStatus::Online);
                info!("Sub-device {}/{} is online", product_id, device_name);
            }
            (GatewayOperation::Offline, true) => {
                directory.remove(product_id, device_name);
                info!("Sub-device {}/{} is offline and removed", product_id, device_name);
            }
            (operation, _) => {
                debug!(
                    "Gateway result for {}/{} not applied: {:?} result={:?}",
                    product_id, device_name, operation, result.result
                );
            }
        }
    }
}

impl MessageInterceptor for GatewayInterceptor {
    fn name(&self) -> &str {
        "gateway"
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn intercept(&self, topic: &str, message: &Message) -> Interception {
        let Some((product_id, device_name)) = GatewayTopics::parse_result_topic(topic) else {
            return Interception::Pass;
        };

        if !self.directory.lock().contains(product_id, device_name) {
            debug!("Gateway result for unknown sub-device {}/{}", product_id, device_name);
            return Interception::Pass;
        }

        match GatewayResult::parse(&message.payload) {
            Ok(result) => self.apply_result(product_id, device_name, &result),
            Err(e) => warn!("Discarding unparseable gateway result on {}: {}", topic, e),
        }
        Interception::Consumed
    }

    fn subscriptions(&self) -> Vec<(String, QoS)> {
        vec![(self.result_topic.clone(), QoS::AtLeastOnce)]
    }

    fn on_subscribe_completed(&self, topic: &str, status: Status) {
        if topic == self.result_topic {
            self.subscribed.store(status.is_ok(), Ordering::SeqCst);
        }
    }

    fn on_subscriptions_reset(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }
}

/// Sub-device reporting on top of a [`Connection`]
pub struct Gateway {
    connection: Arc<Connection>,
    directory: Arc<Mutex<SubdeviceDirectory>>,
    interceptor: Arc<GatewayInterceptor>,
    event_topic: String,
    record: DeviceRecord,
}

impl Gateway {
    /// Create the gateway layer and register its interceptor on `connection`
    pub fn new(connection: Arc<Connection>, profile: GatewayProfile) -> Self {
        let identity = connection.identity().clone();
        let topic_root = profile
            .topic_root
            .clone()
            .unwrap_or_else(|| GatewayTopics::default_root(&identity.product_id, &identity.device_name));

        let directory = Arc::new(Mutex::new(SubdeviceDirectory::new()));
        let interceptor = Arc::new(GatewayInterceptor::new(
            GatewayTopics::result_topic(&identity.product_id, &identity.device_name),
            Arc::clone(&directory),
        ));
        connection.add_interceptor(interceptor.clone());

        let record = DeviceRecord {
            device_id: identity.device_name.clone(),
            host_id: identity.device_name.clone(),
            classify: Classify::Direct,
            name: profile.name,
            alias_id: None,
            device_type: profile.device_type,
            manufacturer_name: profile.manufacturer,
            vaddr: None,
            attributes: Vec::new(),
        };

        Self {
            connection,
            directory,
            interceptor,
            event_topic: GatewayTopics::event_topic(&topic_root),
            record,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn event_topic(&self) -> &str {
        &self.event_topic
    }

    pub fn result_topic(&self) -> &str {
        &self.interceptor.result_topic
    }

    /// Gateway's own direct-device record
    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub fn is_result_subscribed(&self) -> bool {
        self.interceptor.is_subscribed()
    }

    /// Record used for a sub-device referenced without a registered profile
    pub fn default_subdev_record(&self, product_id: &str, device_name: &str) -> DeviceRecord {
        DeviceRecord {
            device_id: format!("{}#{}#{}", self.record.host_id, product_id, device_name),
            host_id: self.record.host_id.clone(),
            classify: Classify::Sub,
            name: device_name.to_string(),
            alias_id: None,
            device_type: product_id.to_string(),
            manufacturer_name: self.record.manufacturer_name.clone(),
            vaddr: None,
            attributes: Vec::new(),
        }
    }

    /// Register a sub-device with its full record; status starts Offline
    pub fn add_subdev(&self, product_id: &str, device_name: &str, mut record: DeviceRecord) -> LinkResult {
        validate_ids(product_id, device_name)?;
        record.classify = Classify::Sub;
        let previous = self
            .directory
            .lock()
            .insert(SubDevice::new(SubdevKey::new(product_id, device_name), record));
        if previous.is_some() {
            debug!("Replaced profile of sub-device {}/{}", product_id, device_name);
        }
        Ok(())
    }

    /// Publish an online report for a sub-device, creating its entry on first reference
    pub fn report_online(&self, product_id: &str, device_name: &str) -> LinkResult {
        let _span = crate::gateway_span!(operation = "report_online", product_id, device_name).entered();
        validate_ids(product_id, device_name)?;

        let record = self
            .directory
            .lock()
            .get_or_insert_with(product_id, device_name, |key| {
                SubDevice::new(key, self.default_subdev_record(product_id, device_name))
            })
            .record
            .clone();

        let report = GatewayMessage::online(vec![record, self.record.clone()]);
        self.publish_report(&report)
    }

    /// Publish an offline report for a known sub-device
    pub fn report_offline(&self, product_id: &str, device_name: &str) -> LinkResult {
        let _span = crate::gateway_span!(operation = "report_offline", product_id, device_name).entered();
        validate_ids(product_id, device_name)?;

        let record = self
            .directory
            .lock()
            .get(product_id, device_name)
            .map(|subdev| subdev.record.clone());
        let Some(record) = record else {
            warn!("Offline report for unknown sub-device {}/{}", product_id, device_name);
            return Err(LinkError::subdev_offline(product_id, device_name));
        };

        let report = GatewayMessage::offline(vec![record]);
        self.publish_report(&report)
    }

    fn publish_report(&self, report: &GatewayMessage) -> LinkResult {
        let payload = report.to_bytes()?;
        debug!(
            "Publishing gateway report msg_type={} msg_id={} to {}",
            report.msg_type, report.msg_id, self.event_topic
        );
        self.connection
            .publish(&self.event_topic, Message::new(payload).with_qos(QoS::AtMostOnce), None)
    }

    pub fn subdev_status(&self, product_id: &str, device_name: &str) -> SubdevStatus {
        self.directory.lock().status(product_id, device_name)
    }

    /// Status mapped onto the caller vocabulary: `Ok`, or why the sub-device is unusable
    pub fn check_subdev(&self, product_id: &str, device_name: &str) -> Status {
        match self.subdev_status(product_id, device_name) {
            SubdevStatus::Online => Status::Ok,
            SubdevStatus::NotExist => Status::SubdevStatNotExist,
            SubdevStatus::Offline | SubdevStatus::Unknown => Status::SubdevStatOffline,
        }
    }

    pub fn set_subdev_status(&self, product_id: &str, device_name: &str, status: SubdevStatus) -> LinkResult {
        if status == SubdevStatus::NotExist {
            return Err(LinkError::invalid_parameter("NotExist is not a storable status"));
        }
        if self.directory.lock().set_status(product_id, device_name, status) {
            Ok(())
        } else {
            Err(LinkError::subdev_not_exist(product_id, device_name))
        }
    }

    /// Keys of every known sub-device, sorted
    pub fn subdevs(&self) -> Vec<SubdevKey> {
        self.directory.lock().keys()
    }
}

fn validate_ids(product_id: &str, device_name: &str) -> LinkResult {
    validate_identifier(product_id)
        .and_then(|()| validate_identifier(device_name))
        .map_err(|e| LinkError::invalid_parameter(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSettings;
    use crate::credentials::DeviceIdentity;
    use crate::testing::mocks::{FakeTransport, RecordingListener};

    fn setup() -> (Arc<FakeTransport>, Arc<RecordingListener>, Gateway) {
        let transport = Arc::new(FakeTransport::new());
        let listener = Arc::new(RecordingListener::new());
        let connection = Arc::new(Connection::new(
            ConnectionSettings::new("tcp://broker:1883", DeviceIdentity::new("GWPID", "gw-1")),
            transport.clone(),
            listener.clone(),
        ));
        transport.set_connected(true);
        let gateway = Gateway::new(connection, GatewayProfile::new("hub").with_manufacturer("ACME"));
        (transport, listener, gateway)
    }

    fn result_message(body: &str) -> Message {
        Message::new(body.as_bytes().to_vec()).with_qos(QoS::AtLeastOnce).with_id(1)
    }

    #[test]
    fn test_topics() {
        let (_transport, _listener, gateway) = setup();
        assert_eq!(gateway.event_topic(), "GWPID/gw-1/event");
        assert_eq!(gateway.result_topic(), "$gateway/operation/result/GWPID/gw-1");
    }

    #[test]
    fn test_report_online_creates_entry() {
        let (transport, _listener, gateway) = setup();
        gateway.report_online("PID", "DEV").unwrap();

        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::Offline);
        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "GWPID/gw-1/event");
        assert_eq!(published[0].1.qos, QoS::AtMostOnce);

        let report = GatewayMessage::from_slice(&published[0].1.payload).unwrap();
        assert_eq!(report.devices[0].device_id, "gw-1#PID#DEV");
        assert_eq!(report.devices[1].manufacturer_name, "ACME");
    }

    #[test]
    fn test_report_offline_unknown_subdev() {
        let (transport, _listener, gateway) = setup();
        let err = gateway.report_offline("PID", "DEV").unwrap_err();
        assert_eq!(err.status(), Status::SubdevStatOffline);
        assert_eq!(transport.publish_count(), 0);
    }

    #[test]
    fn test_report_offline_payload() {
        let (transport, _listener, gateway) = setup();
        gateway.report_online("PID", "DEV").unwrap();
        gateway.report_offline("PID", "DEV").unwrap();

        let published = transport.published();
        let report = GatewayMessage::from_slice(&published[1].1.payload).unwrap();
        assert_eq!(report.msg_type, 3);
        assert_eq!(report.ack, 0);
        assert_eq!(report.code, 0);
        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].classify, Classify::Sub);
    }

    #[test]
    fn test_invalid_identifiers() {
        let (transport, _listener, gateway) = setup();
        let err = gateway.report_online("", "DEV").unwrap_err();
        assert_eq!(err.status(), Status::ParameterInvalid);
        let err = gateway.report_online("PID", "a/b").unwrap_err();
        assert_eq!(err.status(), Status::ParameterInvalid);
        assert_eq!(transport.publish_count(), 0);
    }

    #[test]
    fn test_add_subdev_keeps_profile() {
        let (transport, _listener, gateway) = setup();
        let mut record = gateway.default_subdev_record("PID", "DEV");
        record.name = "Kitchen lamp".to_string();
        record.alias_id = Some(6002);
        record.classify = Classify::Direct;
        gateway.add_subdev("PID", "DEV", record).unwrap();

        gateway.report_online("PID", "DEV").unwrap();
        let report = GatewayMessage::from_slice(&transport.published()[0].1.payload).unwrap();
        assert_eq!(report.devices[0].name, "Kitchen lamp");
        assert_eq!(report.devices[0].alias_id, Some(6002));
        assert_eq!(report.devices[0].classify, Classify::Sub);
    }

    #[test]
    fn test_set_subdev_status() {
        let (_transport, _listener, gateway) = setup();
        let err = gateway
            .set_subdev_status("PID", "DEV", SubdevStatus::Online)
            .unwrap_err();
        assert_eq!(err.status(), Status::SubdevStatNotExist);

        gateway.report_online("PID", "DEV").unwrap();
        gateway
            .set_subdev_status("PID", "DEV", SubdevStatus::Unknown)
            .unwrap();
        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::Unknown);
        assert_eq!(gateway.check_subdev("PID", "DEV"), Status::SubdevStatOffline);
        assert_eq!(gateway.check_subdev("PID", "NOPE"), Status::SubdevStatNotExist);
    }

    #[test]
    fn test_interceptor_applies_results() {
        let (_transport, _listener, gateway) = setup();
        gateway.report_online("PID", "DEV").unwrap();
        let interceptor = &gateway.interceptor;
        let topic = GatewayTopics::result_topic("PID", "DEV");

        let verdict = interceptor.intercept(&topic, &result_message(r#"{"type":"online","result":"0"}"#));
        assert_eq!(verdict, Interception::Consumed);
        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::Online);
        assert_eq!(gateway.check_subdev("PID", "DEV"), Status::Ok);

        let verdict = interceptor.intercept(&topic, &result_message(r#"{"type":"OFFLINE","result":0}"#));
        assert_eq!(verdict, Interception::Consumed);
        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::NotExist);
    }

    #[test]
    fn test_interceptor_failure_result_keeps_status() {
        let (_transport, _listener, gateway) = setup();
        gateway.report_online("PID", "DEV").unwrap();
        let topic = GatewayTopics::result_topic("PID", "DEV");

        let verdict = gateway
            .interceptor
            .intercept(&topic, &result_message(r#"{"type":"online","result":"1"}"#));
        assert_eq!(verdict, Interception::Consumed);
        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::Offline);
    }

    #[test]
    fn test_interceptor_unknown_and_garbage() {
        let (_transport, _listener, gateway) = setup();
        let interceptor = &gateway.interceptor;

        let unknown = GatewayTopics::result_topic("PID", "GHOST");
        assert_eq!(
            interceptor.intercept(&unknown, &result_message(r#"{"type":"online","result":"0"}"#)),
            Interception::Pass
        );
        assert_eq!(
            interceptor.intercept("$gateway/operation/result/no-separator", &result_message("{}")),
            Interception::Pass
        );

        gateway.report_online("PID", "DEV").unwrap();
        let known = GatewayTopics::result_topic("PID", "DEV");
        assert_eq!(
            interceptor.intercept(&known, &result_message("not json")),
            Interception::Consumed
        );
        assert_eq!(gateway.subdev_status("PID", "DEV"), SubdevStatus::Offline);
    }

    #[test]
    fn test_subscription_tracking() {
        let (_transport, _listener, gateway) = setup();
        let interceptor = &gateway.interceptor;
        assert!(!gateway.is_result_subscribed());

        interceptor.on_subscribe_completed("other/topic", Status::Ok);
        assert!(!gateway.is_result_subscribed());

        interceptor.on_subscribe_completed(gateway.result_topic(), Status::Ok);
        assert!(gateway.is_result_subscribed());

        interceptor.on_subscriptions_reset();
        assert!(!gateway.is_result_subscribed());
    }
}
