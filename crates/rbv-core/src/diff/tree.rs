use std::cmp::Ordering;

use crate::diff::{Classifier, DifferingPath, PathChange};
use crate::domain::ContentTree;

/// Diff two content trees path by path.
///
/// Emits one entry per missing, extra, or content-differing file, in path
/// order. Both trees are already sorted, so this is a single merge walk.
pub fn diff_trees(
    official: &ContentTree,
    built: &ContentTree,
    classifier: &Classifier,
) -> Vec<DifferingPath> {
    let mut out = Vec::new();
    let mut a = official.iter().peekable();
    let mut b = built.iter().peekable();

    loop {
        let change = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some((path, _)), None) => {
                let path = path.to_string();
                a.next();
                (path, PathChange::OnlyInOfficial)
            }
            (None, Some((path, _))) => {
                let path = path.to_string();
                b.next();
                (path, PathChange::OnlyInBuilt)
            }
            (Some((pa, da)), Some((pb, db))) => match pa.cmp(pb) {
                Ordering::Less => {
                    let path = pa.to_string();
                    a.next();
                    (path, PathChange::OnlyInOfficial)
                }
                Ordering::Greater => {
                    let path = pb.to_string();
                    b.next();
                    (path, PathChange::OnlyInBuilt)
                }
                Ordering::Equal => {
                    let same = da == db;
                    let path = pa.to_string();
                    a.next();
                    b.next();
                    if same {
                        continue;
                    }
                    (path, PathChange::ContentDiffers)
                }
            },
        };

        let (path, change) = change;
        let classification = classifier.classify(&path);
        out.push(DifferingPath {
            path,
            change,
            classification,
        });
    }

    out
}
