//! Anomaly detector - rolling z-bounds over a market data stream

use serde::Serialize;
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnomalyKind {
    /// Above mean + threshold·σ
    Spike,
    /// Below mean - threshold·σ
    Dropout,
    /// Jump from the previous sample larger than threshold·σ
    Volatility,
}

pub struct AnomalyDetector {
    threshold: f64,
    window_size: usize,
    window: VecDeque<f64>,
    lower_bound: f64,
    upper_bound: f64,
}

impl AnomalyDetector {
    pub fn new(threshold: f64, window_size: usize) -> Result<Self> {
        if threshold <= 0.0 {
            return Err(Error::InvalidParameter("threshold must be greater than 0".into()));
        }
        if window_size == 0 {
            return Err(Error::InvalidParameter("window size must be greater than 0".into()));
        }
        Ok(Self {
            threshold,
            window_size,
            window: VecDeque::with_capacity(window_size),
            lower_bound: 0.0,
            upper_bound: 0.0,
        })
    }

    /// Push a sample; once the window is full, recompute bounds and classify it
    pub fn add_data(&mut self, value: f64) -> Vec<AnomalyKind> {
        while self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);

        if self.window.len() < self.window_size {
            return Vec::new();
        }

        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let std = (self.window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        self.lower_bound = mean - self.threshold * std;
        self.upper_bound = mean + self.threshold * std;

        let mut found = Vec::new();
        if value > self.upper_bound {
            info!("Spike detected: {} exceeds upper bound of {:.4}", value, self.upper_bound);
            found.push(AnomalyKind::Spike);
        }
        if value < self.lower_bound {
            warn!("Dropout detected: {} falls below lower bound of {:.4}", value, self.lower_bound);
            found.push(AnomalyKind::Dropout);
        }
        if self.window.len() >= 2 {
            let previous = self.window[self.window.len() - 2];
            if (value - previous).abs() > self.threshold * std {
                info!("High volatility detected with data: {}", value);
                found.push(AnomalyKind::Volatility);
            }
        }
        found
    }

    pub fn describe(kind: AnomalyKind) -> &'static str {
        match kind {
            AnomalyKind::Spike => "Spike: Anomalous rise in market data.",
            AnomalyKind::Dropout => "Dropout: Anomalous drop in market data.",
            AnomalyKind::Volatility => "Volatility: Sudden fluctuation in market data.",
        }
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_window_size(&mut self, window_size: usize) -> Result<()> {
        if window_size == 0 {
            warn!("Window size must be greater than 0");
            return Err(Error::InvalidParameter("window size must be greater than 0".into()));
        }
        self.window_size = window_size;
        info!("Window size updated to {}", window_size);
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<()> {
        if threshold <= 0.0 {
            warn!("Threshold must be greater than 0");
            return Err(Error::InvalidParameter("threshold must be greater than 0".into()));
        }
        self.threshold = threshold;
        info!("Threshold updated to {}", threshold);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.window.clear();
        info!("Data window cleared");
    }
}
