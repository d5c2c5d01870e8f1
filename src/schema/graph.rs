use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use super::{EntityKind, EntitySpec, ThroughRoute};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("{child}.{column} references {parent}, which is not registered")]
    UnknownParent { child: EntityKind, parent: EntityKind, column: &'static str },

    #[error("{child}.{column} is not a declared field")]
    UnknownColumn { child: EntityKind, column: &'static str },

    #[error("{child}.{column} references {parent}, which has no single-column key")]
    CompositeParent { child: EntityKind, parent: EntityKind, column: &'static str },

    #[error("{entity} is registered twice")]
    DuplicateEntity { entity: EntityKind },

    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<EntityKind>),
}

fn format_cycle(path: &[EntityKind]) -> String {
    path.iter().map(|k| k.name()).collect::<Vec<_>>().join(" -> ")
}

/// One foreign-key edge, seen from either end.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Relation {
    pub parent: EntityKind,
    pub child: EntityKind,
    pub column: &'static str,
    pub optional: bool,
    pub blocks_when: Option<(&'static str, &'static str)>,
}

#[derive(Debug, Default, Serialize)]
struct Node {
    parents: Vec<Relation>,
    children: Vec<Relation>,
}

/// Parent/child relations between entity types, derived from the registry.
///
/// Built once at startup and shared read-only; construction fails if any
/// edge is dangling or the parent relation contains a cycle.
#[derive(Debug, Serialize)]
pub struct DependencyGraph {
    nodes: BTreeMap<EntityKind, Node>,
}

impl DependencyGraph {
    pub fn build(specs: &[&'static EntitySpec]) -> Result<Self, GraphError> {
        let mut nodes: BTreeMap<EntityKind, Node> = BTreeMap::new();
        for spec in specs {
            if nodes.insert(spec.kind, Node::default()).is_some() {
                return Err(GraphError::DuplicateEntity { entity: spec.kind });
            }
        }

        for spec in specs {
            for link in spec.parents {
                if spec.field(link.column).is_none() {
                    return Err(GraphError::UnknownColumn { child: spec.kind, column: link.column });
                }
                let parent_spec = specs.iter().find(|s| s.kind == link.parent).ok_or(GraphError::UnknownParent {
                    child: spec.kind,
                    parent: link.parent,
                    column: link.column,
                })?;
                if !parent_spec.has_surrogate_key() {
                    return Err(GraphError::CompositeParent {
                        child: spec.kind,
                        parent: link.parent,
                        column: link.column,
                    });
                }

                let relation = Relation {
                    parent: link.parent,
                    child: spec.kind,
                    column: link.column,
                    optional: link.optional,
                    blocks_when: link.blocks_when,
                };
                if let Some(node) = nodes.get_mut(&spec.kind) {
                    node.parents.push(relation);
                }
                if let Some(node) = nodes.get_mut(&link.parent) {
                    node.children.push(relation);
                }
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Graph of every registered entity type.
    pub fn from_registry() -> Result<Self, GraphError> {
        Self::build(super::registry::all())
    }

    pub fn parents(&self, kind: EntityKind) -> &[Relation] {
        self.nodes.get(&kind).map(|n| n.parents.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, kind: EntityKind) -> &[Relation] {
        self.nodes.get(&kind).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.nodes.keys().copied()
    }

    pub fn relation(&self, parent: EntityKind, child: EntityKind) -> Option<&Relation> {
        self.children(parent).iter().find(|r| r.child == child)
    }

    /// The two edges behind a [`ThroughRoute`]: parent to intermediate, then intermediate to child.
    pub fn through(&self, route: &ThroughRoute) -> Option<(&Relation, &Relation)> {
        Some((self.relation(route.parent, route.via)?, self.relation(route.via, route.child)?))
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<EntityKind, Mark> = self.nodes.keys().map(|k| (*k, Mark::Unvisited)).collect();

        for start in self.nodes.keys() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS over parent edges; `path` mirrors the in-progress stack.
            let mut stack: Vec<(EntityKind, usize)> = vec![(*start, 0)];
            let mut path: Vec<EntityKind> = vec![*start];
            marks.insert(*start, Mark::InProgress);

            while let Some((kind, next)) = stack.last_mut() {
                let parents = self.parents(*kind);
                if *next < parents.len() {
                    let parent = parents[*next].parent;
                    *next += 1;
                    match marks[&parent] {
                        Mark::InProgress => {
                            let from = path.iter().position(|k| *k == parent).unwrap_or(0);
                            let mut cycle = path[from..].to_vec();
                            cycle.push(parent);
                            return Err(GraphError::Cycle(cycle));
                        }
                        Mark::Unvisited => {
                            marks.insert(parent, Mark::InProgress);
                            stack.push((parent, 0));
                            path.push(parent);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks.insert(*kind, Mark::Done);
                    stack.pop();
                    path.pop();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortDirection;
    use crate::schema::{FieldSpec, ParentLink, SummarySpec};

    const fn test_spec(
        kind: EntityKind,
        fields: &'static [FieldSpec],
        parents: &'static [ParentLink],
    ) -> EntitySpec {
        EntitySpec {
            kind,
            table: kind_table(kind),
            collection: kind_table(kind),
            key: &["id"],
            fields,
            parents,
            unique: &[],
            search: &[],
            filters: &[],
            ranges: &[],
            order: &[("id", SortDirection::Asc)],
            capacity: None,
            summary: SummarySpec { numeric: &[], group_by: &[], distinct: &[] },
            routed: true,
        }
    }

    const fn kind_table(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Institution => "a",
            EntityKind::Tutor => "b",
            _ => "c",
        }
    }

    static CYCLE_A_FIELDS: [FieldSpec; 1] = [FieldSpec::integer("tutor_id")];
    static CYCLE_A_PARENTS: [ParentLink; 1] = [ParentLink::required(EntityKind::Tutor, "tutor_id")];
    static CYCLE_B_FIELDS: [FieldSpec; 1] = [FieldSpec::integer("institution_id")];
    static TO_INSTITUTION: [ParentLink; 1] = [ParentLink::required(EntityKind::Institution, "institution_id")];

    static CYCLE_A: EntitySpec = test_spec(EntityKind::Institution, &CYCLE_A_FIELDS, &CYCLE_A_PARENTS);
    static CYCLE_B: EntitySpec = test_spec(EntityKind::Tutor, &CYCLE_B_FIELDS, &TO_INSTITUTION);
    static DANGLING: EntitySpec = test_spec(EntityKind::Classroom, &CYCLE_B_FIELDS, &TO_INSTITUTION);
    static BAD_COLUMN: EntitySpec = test_spec(EntityKind::Classroom, &[], &TO_INSTITUTION);
    static ROOT: EntitySpec = test_spec(EntityKind::Institution, &[], &[]);

    fn names(relations: &[Relation], child_side: bool) -> Vec<EntityKind> {
        relations.iter().map(|r| if child_side { r.child } else { r.parent }).collect()
    }

    #[test]
    fn test_registry_graph_is_acyclic() {
        let graph = DependencyGraph::from_registry().expect("registry graph should validate");
        assert_eq!(graph.kinds().count(), crate::schema::registry::all().len());
    }

    #[test]
    fn test_children_match_data_model() {
        let graph = DependencyGraph::from_registry().unwrap();
        assert_eq!(
            names(graph.children(EntityKind::Institution), true),
            vec![EntityKind::Classroom, EntityKind::TutoringSession]
        );
        assert_eq!(
            names(graph.children(EntityKind::Tutor), true),
            vec![EntityKind::TutoringSession, EntityKind::RoomAssignment, EntityKind::Activity]
        );
        assert_eq!(
            names(graph.children(EntityKind::TutoringSession), true),
            vec![EntityKind::Enrollment, EntityKind::RoomAssignment, EntityKind::Activity, EntityKind::Question]
        );
        assert_eq!(
            names(graph.children(EntityKind::Enrollment), true),
            vec![EntityKind::Payment, EntityKind::SurveyResponse]
        );
        assert_eq!(names(graph.children(EntityKind::Question), true), vec![EntityKind::AnswerOption]);
        assert!(graph.children(EntityKind::Payment).is_empty());
        assert!(graph.children(EntityKind::RoomAssignment).is_empty());
    }

    #[test]
    fn test_parents_match_data_model() {
        let graph = DependencyGraph::from_registry().unwrap();
        assert_eq!(
            names(graph.parents(EntityKind::RoomAssignment), false),
            vec![EntityKind::Classroom, EntityKind::TutoringSession, EntityKind::Tutor]
        );
        let activity = graph.parents(EntityKind::Activity);
        assert!(!activity[0].optional);
        assert!(activity[1].optional, "tutor link on activities is optional");
        let student = graph.relation(EntityKind::Student, EntityKind::Enrollment).unwrap();
        assert_eq!(student.blocks_when, Some(("status", "Active")));
    }

    #[test]
    fn test_through_routes_resolve() {
        let graph = DependencyGraph::from_registry().unwrap();
        for route in crate::schema::THROUGH_ROUTES {
            let (first, second) = graph.through(route).expect("through route edges exist");
            assert_eq!(first.child, second.parent);
            assert!(graph.relation(route.parent, route.child).is_none(), "{} already has a direct route", route.child);
        }
        let route = &crate::schema::THROUGH_ROUTES[0];
        let (first, second) = graph.through(route).unwrap();
        assert_eq!((first.column, second.column), ("student_id", "enrollment_id"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = DependencyGraph::build(&[&CYCLE_A, &CYCLE_B]).unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&EntityKind::Institution));
                assert!(path.contains(&EntityKind::Tutor));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_parent_is_rejected() {
        let err = DependencyGraph::build(&[&DANGLING]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownParent { parent: EntityKind::Institution, .. }));
    }

    #[test]
    fn test_undeclared_column_is_rejected() {
        let err = DependencyGraph::build(&[&ROOT, &BAD_COLUMN]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownColumn { column: "institution_id", .. }));
    }

    #[test]
    fn test_duplicate_entity_is_rejected() {
        let err = DependencyGraph::build(&[&ROOT, &ROOT]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateEntity { entity: EntityKind::Institution });
    }
}
