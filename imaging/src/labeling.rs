//! Connected-component labelling of binary defect masks.
//!
//! Per-region metrics treat every connected defect in a ground-truth mask as
//! its own region, so that small defects weigh as much as large ones. Labels
//! are assigned with a two-pass scan and a union-find table.

use ndarray::{Array2, ArrayView2};

/// Which neighbouring pixels count as connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Horizontal and vertical neighbours only
    Four,
    /// Horizontal, vertical and diagonal neighbours
    #[default]
    Eight,
}

/// Result of labelling a binary image.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRegions {
    /// 0 for background, `1..=count` for the region each pixel belongs to
    pub labels: Array2<usize>,
    /// Number of distinct regions
    pub count: usize,
}

impl LabeledRegions {
    /// Pixel count of each region, indexed by `label - 1`.
    pub fn region_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.count];
        for &label in self.labels.iter().filter(|&&l| l > 0) {
            sizes[label - 1] += 1;
        }
        sizes
    }
}

fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut root = label;
    while parents[root] != root {
        root = parents[root];
    }

    // Path compression
    let mut current = label;
    while parents[current] != root {
        let next = parents[current];
        parents[current] = root;
        current = next;
    }
    root
}

fn union_labels(parents: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a < root_b {
        parents[root_b] = root_a;
    } else if root_b < root_a {
        parents[root_a] = root_b;
    }
}

/// Label the connected foreground regions (pixels `> 0`) of `binary`.
///
/// Labels are consecutive and numbered in raster order of each region's first
/// pixel.
pub fn connected_components(binary: &ArrayView2<f64>, connectivity: Connectivity) -> LabeledRegions {
    let (height, width) = binary.dim();
    let mut labels = Array2::<usize>::zeros((height, width));
    // parents[0] is the background
    let mut parents = vec![0usize];

    for i in 0..height {
        for j in 0..width {
            if binary[[i, j]] <= 0.0 {
                continue;
            }

            let mut neighbours = [0usize; 4];
            let mut n = 0;
            let mut push = |label: usize| {
                if label > 0 {
                    neighbours[n] = label;
                    n += 1;
                }
            };

            if j > 0 {
                push(labels[[i, j - 1]]);
            }
            if i > 0 {
                push(labels[[i - 1, j]]);
                if connectivity == Connectivity::Eight {
                    if j > 0 {
                        push(labels[[i - 1, j - 1]]);
                    }
                    if j + 1 < width {
                        push(labels[[i - 1, j + 1]]);
                    }
                }
            }

            let neighbours = &neighbours[..n];
            match neighbours.iter().min() {
                None => {
                    let label = parents.len();
                    parents.push(label);
                    labels[[i, j]] = label;
                }
                Some(&min_label) => {
                    labels[[i, j]] = min_label;
                    for &other in neighbours {
                        if other != min_label {
                            union_labels(&mut parents, min_label, other);
                        }
                    }
                }
            }
        }
    }

    // Map provisional labels to consecutive final labels
    let mut relabel = vec![0usize; parents.len()];
    let mut count = 0;
    for label in 1..parents.len() {
        let root = find_root(&mut parents, label);
        if relabel[root] == 0 {
            count += 1;
            relabel[root] = count;
        }
        relabel[label] = relabel[root];
    }

    labels.mapv_inplace(|l| relabel[l]);

    LabeledRegions { labels, count }
}
