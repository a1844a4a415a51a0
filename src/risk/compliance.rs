//! Compliance - per-asset position limits, traded volume and loss ceiling,
//! with an append-only JSON-lines audit trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::core::config::ComplianceConfig;
use crate::core::{Error, Result};

/// One line of the audit log
#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    timestamp: DateTime<Utc>,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset: Option<&'a str>,
    value: f64,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ComplianceViolation {
    PositionLimit { asset: String, position: f64, limit: f64 },
    LossLimit { loss: f64, limit: f64 },
    VolumeLimit { asset: String, volume: f64, limit: f64 },
}

impl fmt::Display for ComplianceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceViolation::PositionLimit { asset, position, limit } => {
                write!(f, "position limit exceeded for {}: {} > {}", asset, position, limit)
            }
            ComplianceViolation::LossLimit { loss, limit } => {
                write!(f, "loss limit exceeded: {} > {}", loss, limit)
            }
            ComplianceViolation::VolumeLimit { asset, volume, limit } => {
                write!(f, "trade volume limit exceeded for {}: {} > {}", asset, volume, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetLine {
    pub asset: String,
    pub position: Option<f64>,
    pub limit: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub current_loss: f64,
    pub max_loss: f64,
    pub assets: Vec<AssetLine>,
}

impl fmt::Display for ComplianceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compliance Report: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Current Loss: {}", self.current_loss)?;
        writeln!(f, "Max Loss Limit: {}", self.max_loss)?;
        for line in &self.assets {
            write!(f, "Asset: {}", line.asset)?;
            if let Some(position) = line.position {
                write!(f, ", Position: {}", position)?;
            }
            if let Some(limit) = line.limit {
                write!(f, ", Limit: {}", limit)?;
            }
            if let Some(volume) = line.volume {
                write!(f, ", Trade Volume: {}", volume)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct ComplianceMonitor {
    max_loss: f64,
    current_loss: f64,
    limits: HashMap<String, f64>,
    positions: BTreeMap<String, f64>,
    volumes: BTreeMap<String, f64>,
    audit: Option<File>,
}

impl ComplianceMonitor {
    pub fn new(max_loss: f64) -> Self {
        Self {
            max_loss,
            current_loss: 0.0,
            limits: HashMap::new(),
            positions: BTreeMap::new(),
            volumes: BTreeMap::new(),
            audit: None,
        }
    }

    pub fn from_config(config: &ComplianceConfig) -> Result<Self> {
        let mut monitor = Self::new(config.max_loss);
        if let Some(path) = &config.audit_log {
            monitor = monitor.with_audit_log(path)?;
        }
        for (asset, limit) in &config.position_limits {
            monitor.set_risk_limit(asset, *limit);
        }
        Ok(monitor)
    }

    /// Append events to `path` (created when missing)
    pub fn with_audit_log(mut self, path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.audit = Some(file);
        info!("Compliance audit log: {}", path.display());
        Ok(self)
    }

    fn log_event(&mut self, kind: &str, asset: Option<&str>, value: f64, message: String) {
        info!(kind, asset, value, "{}", message);
        let Some(file) = self.audit.as_mut() else {
            return;
        };
        let event = AuditEvent {
            timestamp: Utc::now(),
            kind,
            asset,
            value,
            message,
        };
        let written = serde_json::to_string(&event)
            .map_err(Error::from)
            .and_then(|line| writeln!(file, "{}", line).map_err(Error::from));
        if let Err(e) = written {
            warn!("Failed to write compliance audit event: {}", e);
        }
    }

    pub fn set_risk_limit(&mut self, asset: &str, limit: f64) {
        self.limits.insert(asset.to_string(), limit);
        self.log_event("limit", Some(asset), limit, format!("Risk limit set for asset: {} to {}", asset, limit));
    }

    /// Whether `position` is within the asset's limit
    pub fn check_position(&self, asset: &str, position: f64) -> Result<bool> {
        let limit = self
            .limits
            .get(asset)
            .ok_or_else(|| Error::Compliance(format!("no limit set for asset: {}", asset)))?;
        Ok(position.abs() <= *limit)
    }

    pub fn update_position(&mut self, asset: &str, position: f64) -> Result<()> {
        if !self.check_position(asset, position)? {
            self.log_event(
                "violation",
                Some(asset),
                position,
                format!("Compliance violation: position limit exceeded for asset: {}", asset),
            );
            return Err(Error::Compliance(format!("position limit exceeded for asset: {}", asset)));
        }
        self.positions.insert(asset.to_string(), position);
        self.log_event("position", Some(asset), position, format!("Updated position for asset: {} to {}", asset, position));
        Ok(())
    }

    /// Returns the asset's cumulative volume
    pub fn update_trade_volume(&mut self, asset: &str, volume: f64) -> f64 {
        let total = {
            let entry = self.volumes.entry(asset.to_string()).or_insert(0.0);
            *entry += volume;
            *entry
        };
        self.log_event("volume", Some(asset), total, format!("Updated trade volume for asset: {} to {}", asset, total));
        total
    }

    /// Returns false once the cumulative loss is over the limit
    pub fn register_loss(&mut self, loss: f64) -> bool {
        self.current_loss += loss;
        self.log_event(
            "loss",
            None,
            loss,
            format!("Registered loss of {}. Current total loss: {}", loss, self.current_loss),
        );
        if self.current_loss > self.max_loss {
            self.log_event("violation", None, self.current_loss, "Warning: Maximum loss limit exceeded!".into());
            return false;
        }
        true
    }

    /// All current violations; empty means compliant
    pub fn check_compliance(&mut self) -> Vec<ComplianceViolation> {
        let mut violations = Vec::new();
        for (asset, &position) in &self.positions {
            match self.limits.get(asset) {
                Some(&limit) if position.abs() > limit => {
                    violations.push(ComplianceViolation::PositionLimit {
                        asset: asset.clone(),
                        position,
                        limit,
                    });
                }
                _ => {}
            }
        }
        if self.current_loss > self.max_loss {
            violations.push(ComplianceViolation::LossLimit {
                loss: self.current_loss,
                limit: self.max_loss,
            });
        }
        for v in &violations {
            self.log_event("violation", None, 0.0, format!("Compliance violation: {}", v));
        }
        violations
    }

    pub fn check_volume_compliance(&mut self, asset: &str, limit: f64) -> Option<ComplianceViolation> {
        let volume = self.volumes.get(asset).copied().unwrap_or(0.0);
        if volume > limit {
            let violation = ComplianceViolation::VolumeLimit {
                asset: asset.to_string(),
                volume,
                limit,
            };
            self.log_event("violation", Some(asset), volume, format!("Compliance violation: {}", violation));
            return Some(violation);
        }
        None
    }

    pub fn current_loss(&self) -> f64 {
        self.current_loss
    }

    pub fn generate_report(&self) -> ComplianceReport {
        let mut assets: Vec<String> = self.positions.keys().chain(self.volumes.keys()).cloned().collect();
        assets.sort();
        assets.dedup();
        ComplianceReport {
            generated_at: Utc::now(),
            current_loss: self.current_loss,
            max_loss: self.max_loss,
            assets: assets
                .into_iter()
                .map(|asset| AssetLine {
                    position: self.positions.get(&asset).copied(),
                    limit: self.limits.get(&asset).copied(),
                    volume: self.volumes.get(&asset).copied(),
                    asset,
                })
                .collect(),
        }
    }
}
