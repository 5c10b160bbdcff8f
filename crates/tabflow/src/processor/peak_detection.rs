//! Peak finding over a single numeric column.
//!
//! Candidates are local maxima (plateaus resolve to their midpoint). Optional
//! filters are applied in a fixed order: height, threshold, distance,
//! prominence, width. Width is measured at half the peak's prominence.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use crate::error::ProcessError;
use crate::model::ParameterBag;
use crate::processor::{params, Processor};
use crate::table::{float_to_json, Table};

pub struct PeakDetection;

/// Filter thresholds. `None` disables the filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakOptions {
    pub height: Option<f64>,
    pub threshold: Option<f64>,
    pub distance: Option<f64>,
    pub prominence: Option<f64>,
    pub width: Option<f64>,
}

impl PeakOptions {
    fn from_params(params: &ParameterBag) -> Self {
        let distance = params::number(params, "distance").and_then(|d| {
            if d >= 1.0 {
                Some(d)
            } else {
                log::warn!("distance must be >= 1, got {}; ignoring", d);
                None
            }
        });

        Self {
            height: params::number(params, "height"),
            threshold: params::number(params, "threshold"),
            distance,
            prominence: params::number(params, "prominence"),
            width: params::number(params, "width"),
        }
    }
}

/// Peak indices plus the per-peak properties computed by the active filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakResult {
    pub peaks: Vec<usize>,
    pub peak_heights: Option<Vec<f64>>,
    pub left_thresholds: Option<Vec<f64>>,
    pub right_thresholds: Option<Vec<f64>>,
    pub prominences: Option<Vec<f64>>,
    pub left_bases: Option<Vec<usize>>,
    pub right_bases: Option<Vec<usize>>,
    pub widths: Option<Vec<f64>>,
    pub width_heights: Option<Vec<f64>>,
    pub left_ips: Option<Vec<f64>>,
    pub right_ips: Option<Vec<f64>>,
}

fn retain_by<T: Copy>(values: &mut Option<Vec<T>>, keep: &[bool]) {
    if let Some(values) = values {
        *values = values
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(v, _)| *v)
            .collect();
    }
}

impl PeakResult {
    fn retain(&mut self, keep: &[bool]) {
        let mut peaks = Some(std::mem::take(&mut self.peaks));
        retain_by(&mut peaks, keep);
        self.peaks = peaks.unwrap_or_default();

        retain_by(&mut self.peak_heights, keep);
        retain_by(&mut self.left_thresholds, keep);
        retain_by(&mut self.right_thresholds, keep);
        retain_by(&mut self.prominences, keep);
        retain_by(&mut self.left_bases, keep);
        retain_by(&mut self.right_bases, keep);
        retain_by(&mut self.widths, keep);
        retain_by(&mut self.width_heights, keep);
        retain_by(&mut self.left_ips, keep);
        retain_by(&mut self.right_ips, keep);
    }

    fn properties(&self) -> Value {
        fn floats(values: &[f64]) -> Value {
            Value::Array(values.iter().map(|v| float_to_json(*v)).collect())
        }

        let mut props = Map::new();
        let float_props = [
            ("peak_heights", &self.peak_heights),
            ("left_thresholds", &self.left_thresholds),
            ("right_thresholds", &self.right_thresholds),
            ("prominences", &self.prominences),
            ("widths", &self.widths),
            ("width_heights", &self.width_heights),
            ("left_ips", &self.left_ips),
            ("right_ips", &self.right_ips),
        ];
        for (key, values) in float_props {
            if let Some(values) = values {
                props.insert(key.to_string(), floats(values));
            }
        }
        if let Some(bases) = &self.left_bases {
            props.insert("left_bases".to_string(), json!(bases));
        }
        if let Some(bases) = &self.right_bases {
            props.insert("right_bases".to_string(), json!(bases));
        }
        Value::Object(props)
    }
}

/// Indices of local maxima. A flat top is reported once, at its midpoint
/// (rounded down). Edges are never peaks.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Keeps the highest peaks first and drops any neighbour closer than `distance`.
fn select_by_distance(peaks: &[usize], x: &[f64], distance: usize) -> Vec<bool> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| {
        x[peaks[a]]
            .partial_cmp(&x[peaks[b]])
            .unwrap_or(Ordering::Equal)
    });

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    keep
}

/// Prominence and bases of each peak, searching the whole series on both sides.
fn peak_prominences(x: &[f64], peaks: &[usize]) -> (Vec<f64>, Vec<usize>, Vec<usize>) {
    let mut prominences = Vec::with_capacity(peaks.len());
    let mut left_bases = Vec::with_capacity(peaks.len());
    let mut right_bases = Vec::with_capacity(peaks.len());

    for &peak in peaks {
        let top = x[peak];

        let mut left_min = top;
        let mut left_base = peak;
        let mut i = peak;
        loop {
            // NaN ends the search as well.
            if !(x[i] <= top) {
                break;
            }
            if x[i] < left_min {
                left_min = x[i];
                left_base = i;
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }

        let mut right_min = top;
        let mut right_base = peak;
        let mut i = peak;
        while i < x.len() && x[i] <= top {
            if x[i] < right_min {
                right_min = x[i];
                right_base = i;
            }
            i += 1;
        }

        prominences.push(top - left_min.max(right_min));
        left_bases.push(left_base);
        right_bases.push(right_base);
    }

    (prominences, left_bases, right_bases)
}

struct Widths {
    widths: Vec<f64>,
    heights: Vec<f64>,
    left_ips: Vec<f64>,
    right_ips: Vec<f64>,
}

/// Widths at half prominence with linear interpolation between samples.
fn peak_widths(
    x: &[f64],
    peaks: &[usize],
    prominences: &[f64],
    left_bases: &[usize],
    right_bases: &[usize],
) -> Widths {
    const REL_HEIGHT: f64 = 0.5;
    let mut out = Widths {
        widths: Vec::with_capacity(peaks.len()),
        heights: Vec::with_capacity(peaks.len()),
        left_ips: Vec::with_capacity(peaks.len()),
        right_ips: Vec::with_capacity(peaks.len()),
    };

    for (n, &peak) in peaks.iter().enumerate() {
        let height = x[peak] - prominences[n] * REL_HEIGHT;

        let mut i = peak;
        while left_bases[n] < i && height < x[i] {
            i -= 1;
        }
        let mut left_ip = i as f64;
        if x[i] < height {
            left_ip += (height - x[i]) / (x[i + 1] - x[i]);
        }

        let mut i = peak;
        while i < right_bases[n] && height < x[i] {
            i += 1;
        }
        let mut right_ip = i as f64;
        if x[i] < height {
            right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
        }

        out.widths.push(right_ip - left_ip);
        out.heights.push(height);
        out.left_ips.push(left_ip);
        out.right_ips.push(right_ip);
    }
    out
}

/// Finds peaks in `x`. Missing samples should be passed as NaN; they never
/// qualify as peaks and stop base searches.
pub fn find_peaks(x: &[f64], options: &PeakOptions) -> PeakResult {
    let mut result = PeakResult {
        peaks: local_maxima(x),
        ..Default::default()
    };

    if let Some(min_height) = options.height {
        let heights: Vec<f64> = result.peaks.iter().map(|&p| x[p]).collect();
        let keep: Vec<bool> = heights.iter().map(|h| *h >= min_height).collect();
        result.peak_heights = Some(heights);
        result.retain(&keep);
    }

    if let Some(min_threshold) = options.threshold {
        let left: Vec<f64> = result.peaks.iter().map(|&p| x[p] - x[p - 1]).collect();
        let right: Vec<f64> = result.peaks.iter().map(|&p| x[p] - x[p + 1]).collect();
        let keep: Vec<bool> = left
            .iter()
            .zip(&right)
            .map(|(l, r)| l.min(*r) >= min_threshold)
            .collect();
        result.left_thresholds = Some(left);
        result.right_thresholds = Some(right);
        result.retain(&keep);
    }

    if let Some(distance) = options.distance {
        let keep = select_by_distance(&result.peaks, x, distance.ceil() as usize);
        result.retain(&keep);
    }

    if options.prominence.is_some() || options.width.is_some() {
        let (prominences, left_bases, right_bases) = peak_prominences(x, &result.peaks);
        let keep: Vec<bool> = match options.prominence {
            Some(min_prominence) => prominences.iter().map(|p| *p >= min_prominence).collect(),
            None => vec![true; prominences.len()],
        };
        result.prominences = Some(prominences);
        result.left_bases = Some(left_bases);
        result.right_bases = Some(right_bases);
        result.retain(&keep);
    }

    if let Some(min_width) = options.width {
        let widths = peak_widths(
            x,
            &result.peaks,
            result.prominences.as_deref().unwrap_or_default(),
            result.left_bases.as_deref().unwrap_or_default(),
            result.right_bases.as_deref().unwrap_or_default(),
        );
        let keep: Vec<bool> = widths.widths.iter().map(|w| *w >= min_width).collect();
        result.widths = Some(widths.widths);
        result.width_heights = Some(widths.heights);
        result.left_ips = Some(widths.left_ips);
        result.right_ips = Some(widths.right_ips);
        result.retain(&keep);
    }

    result
}

impl Processor for PeakDetection {
    fn name(&self) -> &'static str {
        "peak_detection"
    }

    fn validate(&self, params: &ParameterBag) -> Result<(), ProcessError> {
        params::check_string(params, "column")
    }

    fn process(&self, table: Table, params: &ParameterBag) -> Result<Value, ProcessError> {
        let column_name = match params::string(params, "column") {
            Some(name) => name,
            None => table
                .numeric_column_names()
                .into_iter()
                .next()
                .ok_or(ProcessError::NoNumericColumns)?,
        };
        let column = table
            .column(&column_name)
            .ok_or_else(|| ProcessError::ColumnNotFound(column_name.clone()))?;

        let result = match column.numeric_values() {
            Some(values) => {
                let x: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
                find_peaks(&x, &PeakOptions::from_params(params))
            }
            None => {
                log::warn!("Column '{}' is not numeric, reporting no peaks", column_name);
                PeakResult::default()
            }
        };

        Ok(json!({
            "column": column_name,
            "peaks": result.peaks,
            "properties": result.properties(),
        }))
    }
}
