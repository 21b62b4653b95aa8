use std::{
    collections::BTreeSet,
    marker::PhantomData,
    ops::{BitOr, Shr},
};

use anyhow::{bail, Result};
use lazydag_task::delayed_inner::DelayedInner;

use crate::delayed::Delayed;

/// Orders `b` after `a` without passing any data between them.
///
/// Fails when the handles belong to different graphs.
pub fn seq<T, G>(a: &Delayed<T>, b: &Delayed<G>) -> Result<Delayed<G>> {
    check_same_graph(a, b)?;
    Ok(link(a, b))
}

/// Groups two handles so a following [`seq`] orders both of them.
///
/// Fails when the handles belong to different graphs.
pub fn par<T, G>(a: &Delayed<T>, b: &Delayed<G>) -> Result<Delayed<G>> {
    check_same_graph(a, b)?;
    Ok(group(a, b))
}

fn check_same_graph<T, G>(a: &Delayed<T>, b: &Delayed<G>) -> Result<()> {
    if !a.graph.is_same(&b.graph) {
        bail!(
            "can't combine task_id {} of graph '{}' with task_id {} of graph '{}'",
            a.id(),
            a.graph.name(),
            b.id(),
            b.graph.name()
        );
    }
    Ok(())
}

// operator traits can't return errors
fn assert_same_graph<T, G>(a: &Delayed<T>, b: &Delayed<G>) {
    if let Err(err) = check_same_graph(a, b) {
        panic!("{err}");
    }
}

fn link<T, G>(a: &Delayed<T>, b: &Delayed<G>) -> Delayed<G> {
    for up in a.task_ids() {
        for down in b.task_ids() {
            b.graph.add_edge(*up, *down);
        }
    }

    Delayed::new(
        DelayedInner {
            task_ids: b.task_ids().clone(),
            key: None,
            _marker: PhantomData,
        },
        b.graph.clone(),
    )
}

fn group<T, G>(a: &Delayed<T>, b: &Delayed<G>) -> Delayed<G> {
    let mut task_ids: BTreeSet<usize> = BTreeSet::new();
    task_ids.extend(a.task_ids());
    task_ids.extend(b.task_ids());

    Delayed::new(
        DelayedInner {
            task_ids,
            key: None,
            _marker: PhantomData,
        },
        b.graph.clone(),
    )
}

/// `a >> b` is [`seq`].
///
/// # Panics
///
/// When `a` and `b` belong to different graphs.
impl<T, G> Shr<&Delayed<G>> for &Delayed<T> {
    type Output = Delayed<G>;
    fn shr(self, rhs: &Delayed<G>) -> Self::Output {
        assert_same_graph(self, rhs);
        link(self, rhs)
    }
}

impl<T, G> Shr<Delayed<G>> for Delayed<T> {
    type Output = Delayed<G>;
    fn shr(self, rhs: Delayed<G>) -> Self::Output {
        assert_same_graph(&self, &rhs);
        link(&self, &rhs)
    }
}

impl<T, G> Shr<Delayed<G>> for &Delayed<T> {
    type Output = Delayed<G>;
    fn shr(self, rhs: Delayed<G>) -> Self::Output {
        assert_same_graph(self, &rhs);
        link(self, &rhs)
    }
}

impl<T, G> Shr<&Delayed<G>> for Delayed<T> {
    type Output = Delayed<G>;
    fn shr(self, rhs: &Delayed<G>) -> Self::Output {
        assert_same_graph(&self, rhs);
        link(&self, rhs)
    }
}

/// `a | b` is [`par`].
///
/// # Panics
///
/// When `a` and `b` belong to different graphs.
impl<T, G> BitOr<&Delayed<G>> for &Delayed<T> {
    type Output = Delayed<G>;
    fn bitor(self, rhs: &Delayed<G>) -> Self::Output {
        assert_same_graph(self, rhs);
        group(self, rhs)
    }
}

impl<T, G> BitOr<Delayed<G>> for Delayed<T> {
    type Output = Delayed<G>;
    fn bitor(self, rhs: Delayed<G>) -> Self::Output {
        assert_same_graph(&self, &rhs);
        group(&self, &rhs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};

    use crate::graph::Graph;

    use super::{par, seq};

    fn noop(_: ()) {}

    #[test]
    fn test_seq_and_par_edges() {
        let graph = Graph::new("flow");
        let a = graph.delayed(noop, ()).unwrap();
        let b = graph.delayed(noop, ()).unwrap();
        let c = graph.delayed(noop, ()).unwrap();
        let d = graph.delayed(noop, ()).unwrap();

        let _ = &a >> (&b | &c) >> d;

        assert_eq!(
            graph.edges(),
            HashSet::from([(0, 1), (0, 2), (1, 3), (2, 3)])
        );
    }

    #[test]
    fn test_seq_and_par_functions() {
        let graph = Graph::new("flow");
        let a = graph.delayed(noop, ()).unwrap();
        let b = graph.delayed(noop, ()).unwrap();
        let c = graph.delayed(noop, ()).unwrap();

        let bc = par(&b, &c).unwrap();
        assert_eq!(bc.task_ids(), &BTreeSet::from([1, 2]));
        seq(&a, &bc).unwrap();
        assert_eq!(graph.edges(), HashSet::from([(0, 1), (0, 2)]));
    }

    #[test]
    fn test_seq_rejects_other_graph() {
        let graph = Graph::new("flow");
        let other = Graph::new("other");
        let a = graph.delayed(noop, ()).unwrap();
        let _ = graph.delayed(noop, ()).unwrap();
        let _ = other.delayed(noop, ()).unwrap();
        let foreign = other.delayed(noop, ()).unwrap();

        assert!(seq(&a, &foreign).is_err());
        assert!(par(&a, &foreign).is_err());
        assert!(graph.edges().is_empty());
        assert!(other.edges().is_empty());
    }

    #[test]
    #[should_panic(expected = "can't combine task_id")]
    fn test_shr_panics_on_other_graph() {
        let a = Graph::new("flow").delayed(noop, ()).unwrap();
        let b = Graph::new("other").delayed(noop, ()).unwrap();

        let _ = &a >> &b;
    }
}
