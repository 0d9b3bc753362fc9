/// Upper bound on peaks collected from one window.
pub const MAX_PEAKS: usize = 15;

/// Sample indices of detected peaks, at most [`MAX_PEAKS`], ascending after detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeakSet {
    locs: Vec<usize>,
}

impl PeakSet {
    pub fn new() -> Self {
        Self {
            locs: Vec::with_capacity(MAX_PEAKS),
        }
    }

    /// Adds a peak unless the set is already full.
    pub fn push(&mut self, index: usize) -> bool {
        if self.locs.len() >= MAX_PEAKS {
            return false;
        }
        self.locs.push(index);
        true
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.locs
    }

    pub fn len(&self) -> usize {
        self.locs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }

    /// Mean spacing between consecutive peaks, `None` with fewer than two.
    pub fn mean_interval(&self) -> Option<usize> {
        match (self.locs.first(), self.locs.last()) {
            (Some(first), Some(last)) if self.locs.len() >= 2 => {
                Some((last - first) / (self.locs.len() - 1))
            }
            _ => None,
        }
    }

    /// Consecutive `(left, right)` index pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.locs.windows(2).map(|w| (w[0], w[1]))
    }
}

/// Finds peaks above `min_height`, drops those within `min_distance` of a
/// taller one, and returns at most `max_peaks` indices in ascending order.
pub fn find_peaks(x: &[i32], min_height: i32, min_distance: usize, max_peaks: usize) -> PeakSet {
    let mut peaks = find_peaks_above(x, min_height);
    remove_close_peaks(&mut peaks, x, min_distance);
    peaks.locs.truncate(max_peaks);
    peaks
}

/// Left-to-right scan. A run of equal samples counts as one peak at its
/// left edge, and only if the run is followed by a fall.
fn find_peaks_above(x: &[i32], min_height: i32) -> PeakSet {
    let mut peaks = PeakSet::new();
    let n = x.len();
    let mut i = 1;

    while i + 1 < n {
        if x[i] > min_height && x[i] > x[i - 1] {
            let mut width = 1;
            while i + width < n && x[i] == x[i + width] {
                width += 1;
            }

            let falls = i + width < n && x[i] > x[i + width];
            if falls && peaks.push(i) {
                i += width + 1;
            } else {
                i += width;
            }
        } else {
            i += 1;
        }
    }

    peaks
}

/// Greedy acceptance from tallest to shortest. The first pass is anchored at
/// a virtual peak at index -1, which also removes peaks hugging the window start.
fn remove_close_peaks(peaks: &mut PeakSet, x: &[i32], min_distance: usize) {
    let locs = &mut peaks.locs;
    locs.sort_by(|a, b| x[*b].cmp(&x[*a]));

    let min_distance = min_distance as isize;
    let mut anchor_pos: Option<usize> = None;

    loop {
        let anchor = anchor_pos.map_or(-1, |p| locs[p] as isize);
        let start = anchor_pos.map_or(0, |p| p + 1);

        let mut kept = start;
        for j in start..locs.len() {
            let dist = locs[j] as isize - anchor;
            if dist.abs() > min_distance {
                locs[kept] = locs[j];
                kept += 1;
            }
        }
        locs.truncate(kept);

        if start >= locs.len() {
            break;
        }
        anchor_pos = Some(start);
    }

    locs.sort_unstable();
}
