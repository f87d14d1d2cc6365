//! Turns stage artifacts into product notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::pass::Pass;
use crate::pipeline::StageSpec;

use super::config::PublisherConfig;
use super::traits::Publisher;
use super::types::ProductNotification;

const SENSOR: &str = "modis";
const FORMAT: &str = "EOS";
const DATA_TYPE: &str = "HDF4";

/// Announces every artifact of a succeeded stage.
pub struct ResultPublisher {
    config: PublisherConfig,
    sink: Arc<dyn Publisher>,
    audit: Option<AuditHandle>,
}

impl ResultPublisher {
    pub fn new(config: PublisherConfig, sink: Arc<dyn Publisher>) -> Self {
        Self {
            config,
            sink,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    fn topic(&self, pass: &Pass, stage: &StageSpec) -> String {
        self.config.render_topic(&[
            ("format", FORMAT),
            ("product", &stage.product),
            ("station", &self.config.station),
            ("platform", pass.platform.slug()),
            ("stage", &stage.name),
        ])
    }

    /// Builds the notification for one artifact.
    pub fn notification(
        &self,
        pass: &Pass,
        stage: &StageSpec,
        artifact: &Path,
        now: DateTime<Utc>,
    ) -> ProductNotification {
        ProductNotification {
            id: Uuid::new_v4(),
            topic: self.topic(pass, stage),
            pass_id: pass.id.clone(),
            platform: pass.platform,
            platform_name: pass.platform.platform_name().to_string(),
            start_time: pass.start_time,
            orbit_number: pass.orbit_number,
            product: stage.product.clone(),
            uri: format!("file://{}", artifact.display()),
            uid: artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            stage: stage.name.clone(),
            station: self.config.station.clone(),
            sensor: SENSOR.to_string(),
            format: FORMAT.to_string(),
            data_type: DATA_TYPE.to_string(),
            published_at: now,
        }
    }

    /// Publishes one notification per artifact and returns how many went out.
    ///
    /// Failures are logged and counted; they never fail the stage.
    pub async fn publish(&self, pass: &Pass, stage: &StageSpec, artifacts: &[PathBuf]) -> usize {
        if !stage.publish {
            return 0;
        }

        let mut published = 0;
        for artifact in artifacts {
            let notification = self.notification(pass, stage, artifact, Utc::now());
            let uri = notification.uri.clone();
            let topic = notification.topic.clone();

            match self.sink.publish(notification).await {
                Ok(()) => {
                    published += 1;
                    metrics::PRODUCTS_PUBLISHED
                        .with_label_values(&[stage.product.as_str()])
                        .inc();
                    info!(pass_id = %pass.id, stage = %stage.name, topic = %topic, "Published {}", uri);

                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::ProductPublished {
                                pass_id: pass.id.to_string(),
                                stage: stage.name.clone(),
                                product: stage.product.clone(),
                                uri,
                            })
                            .await;
                    }
                }
                Err(e) => {
                    metrics::PUBLISH_FAILURES.inc();
                    warn!(
                        pass_id = %pass.id,
                        stage = %stage.name,
                        "Failed to publish {} via {}: {}", uri, self.sink.name(), e
                    );
                }
            }
        }
        published
    }
}
