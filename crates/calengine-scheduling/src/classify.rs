/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Scheduling-object classification.
//!
//! Decides, for the acting principal, whether an entity is an
//! organizer-scheduling-object or an attendee-scheduling-object, and on
//! the organizer path replaces expandable group attendees with their
//! membership. Classification runs on every add and update; membership is
//! looked up fresh each time because directory contents change between
//! transactions.

use calengine_core::{
    changes::{ChangeTable, ChangeValue, PropertyIndex},
    directory::DirectoryProvider,
    error::Result,
    event::{Attendee, CuType, EntityType, Event, ParticipationStatus, PollBallot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    None,
    OrganizerObject,
    AttendeeObject,
}

/// Classify `event` for `principal_href`, updating the event's
/// scheduling-object flags in place. On the organizer path, group
/// attendees resolvable through the directory are expanded into their
/// members; both the group removal and every member addition are recorded
/// in `changes`.
pub fn classify(
    event: &mut Event,
    changes: &mut ChangeTable,
    principal_href: &str,
    directory: &dyn DirectoryProvider,
) -> Result<Classification> {
    event.organizer_scheduling_object = false;
    event.attendee_scheduling_object = false;

    if !event.entity_type.is_schedulable() {
        return Ok(Classification::None);
    }
    let Some(organizer_uri) = event.organizer.as_ref().map(|o| o.uri.clone()) else {
        return Ok(Classification::None);
    };
    if event.attendees.is_empty() {
        return Ok(Classification::None);
    }

    if directory.caladdr_to_principal(&organizer_uri)?.as_deref() == Some(principal_href) {
        event.organizer_scheduling_object = true;
        expand_groups(event, changes, directory);
        return Ok(Classification::OrganizerObject);
    }

    for attendee in &event.attendees {
        if directory.caladdr_to_principal(&attendee.uri)?.as_deref() == Some(principal_href) {
            event.attendee_scheduling_object = true;
            return Ok(Classification::AttendeeObject);
        }
    }

    Ok(Classification::None)
}

/// Replace every expandable group attendee with its membership. Groups the
/// directory cannot expand (external addresses, lookup failures) are left
/// in place; a failed lookup never fails the mutation. For polls the
/// group's ballot is re-issued per member with its vote-item identifiers
/// preserved.
fn expand_groups(event: &mut Event, changes: &mut ChangeTable, directory: &dyn DirectoryProvider) {
    let groups: Vec<Attendee> = event
        .attendees
        .iter()
        .filter(|a| a.cu_type == CuType::Group)
        .cloned()
        .collect();
    if groups.is_empty() {
        return;
    }
    let is_poll = event.entity_type == EntityType::Poll;

    for group in groups {
        let members = match directory.expand_group(&group.uri, group.cu_type) {
            Ok(Some(info)) => match info.members {
                Some(members) => members,
                None => continue,
            },
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(group = %group.uri, error = %err, "group expansion failed");
                continue;
            }
        };

        let group_ballot = if is_poll {
            if event.ballot_for(&group.uri).is_none() {
                tracing::warn!(group = %group.uri, "no ballot recorded for group voter");
                continue;
            }
            event.remove_ballot(&group.uri)
        } else {
            None
        };

        event.remove_attendee(&group.uri);
        changes.changed(
            PropertyIndex::Attendee,
            Some(ChangeValue::Attendee(group.clone())),
            None,
        );

        for member in members {
            let Some(caladdr) = member.calendar_address else {
                continue;
            };
            let mut attendee = Attendee::new(caladdr.clone());
            attendee.common_name = member.email.clone();
            attendee.cu_type = member.kind.into();
            attendee.role = group.role;
            attendee.part_stat = ParticipationStatus::NeedsAction;
            attendee.member = Some(group.uri.clone());

            changes.add_value(
                PropertyIndex::Attendee,
                ChangeValue::Attendee(attendee.clone()),
            );
            event.add_attendee(attendee);

            if let Some(ballot) = &group_ballot {
                event.poll_ballots.push(PollBallot {
                    voter_uri: caladdr,
                    votes: ballot.votes.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calengine_core::{
        directory::{PrincipalInfo, PrincipalKind},
        error::EngineError,
        event::{Organizer, PollVote},
    };
    use std::collections::HashMap;

    struct MapDirectory {
        principals: HashMap<String, String>,
        groups: HashMap<String, Vec<PrincipalInfo>>,
        fail_groups: bool,
    }

    impl MapDirectory {
        fn new() -> Self {
            MapDirectory {
                principals: HashMap::new(),
                groups: HashMap::new(),
                fail_groups: false,
            }
        }

        fn with_user(mut self, caladdr: &str, href: &str) -> Self {
            self.principals.insert(caladdr.to_string(), href.to_string());
            self
        }

        fn with_group(mut self, caladdr: &str, members: &[&str]) -> Self {
            self.groups.insert(
                caladdr.to_string(),
                members
                    .iter()
                    .map(|m| PrincipalInfo {
                        href: format!("/principals/users/{m}"),
                        calendar_address: Some(format!("mailto:{m}@example.com")),
                        email: Some(format!("{m}@example.com")),
                        kind: PrincipalKind::Individual,
                        members: None,
                    })
                    .collect(),
            );
            self
        }
    }

    impl DirectoryProvider for MapDirectory {
        fn caladdr_to_principal(&self, uri: &str) -> Result<Option<String>> {
            Ok(self.principals.get(uri).cloned())
        }

        fn expand_group(&self, uri: &str, _cu_type: CuType) -> Result<Option<PrincipalInfo>> {
            if self.fail_groups {
                return Err(EngineError::Directory("ldap unreachable".to_string()));
            }
            Ok(self.groups.get(uri).map(|members| PrincipalInfo {
                href: uri.to_string(),
                calendar_address: Some(uri.to_string()),
                email: None,
                kind: PrincipalKind::Group,
                members: Some(members.clone()),
            }))
        }
    }

    fn meeting(organizer: &str, attendees: &[&str]) -> Event {
        let mut ev = Event::new(EntityType::Event);
        ev.organizer = Some(Organizer::new(organizer));
        for uri in attendees {
            ev.add_attendee(Attendee::new(*uri));
        }
        ev
    }

    #[test]
    fn organizer_principal_is_an_organizer_object() {
        let dir = MapDirectory::new()
            .with_user("mailto:a@example.com", "/principals/users/a")
            .with_user("mailto:b@example.com", "/principals/users/b");
        let mut ev = meeting("mailto:a@example.com", &["mailto:a@example.com", "mailto:b@example.com"]);
        let mut changes = ChangeTable::new("/principals/users/a");

        let c = classify(&mut ev, &mut changes, "/principals/users/a", &dir).unwrap();
        assert_eq!(c, Classification::OrganizerObject);
        assert!(ev.organizer_scheduling_object);
        assert!(!ev.attendee_scheduling_object);
    }

    #[test]
    fn attendee_principal_is_an_attendee_object() {
        let dir = MapDirectory::new()
            .with_user("mailto:a@example.com", "/principals/users/a")
            .with_user("mailto:b@example.com", "/principals/users/b");
        let mut ev = meeting("mailto:a@example.com", &["mailto:a@example.com", "mailto:b@example.com"]);
        let mut changes = ChangeTable::new("/principals/users/b");

        let c = classify(&mut ev, &mut changes, "/principals/users/b", &dir).unwrap();
        assert_eq!(c, Classification::AttendeeObject);
        assert!(!ev.organizer_scheduling_object);
        assert!(ev.attendee_scheduling_object);
    }

    #[test]
    fn entity_without_attendees_or_organizer_is_not_a_scheduling_object() {
        let dir = MapDirectory::new().with_user("mailto:a@example.com", "/principals/users/a");
        let mut no_attendees = Event::new(EntityType::Event);
        no_attendees.organizer = Some(Organizer::new("mailto:a@example.com"));
        let mut changes = ChangeTable::new("/principals/users/a");
        assert_eq!(
            classify(&mut no_attendees, &mut changes, "/principals/users/a", &dir).unwrap(),
            Classification::None
        );

        let mut journal = meeting("mailto:a@example.com", &["mailto:b@example.com"]);
        journal.entity_type = EntityType::Journal;
        assert_eq!(
            classify(&mut journal, &mut changes, "/principals/users/a", &dir).unwrap(),
            Classification::None
        );
    }

    #[test]
    fn groups_are_replaced_by_their_members() {
        let dir = MapDirectory::new()
            .with_user("mailto:a@example.com", "/principals/users/a")
            .with_group("mailto:team@example.com", &["m1", "m2"]);
        let mut ev = meeting("mailto:a@example.com", &["mailto:b@example.com"]);
        let mut group = Attendee::new("mailto:team@example.com");
        group.cu_type = CuType::Group;
        ev.add_attendee(group);
        let mut changes = ChangeTable::new("/principals/users/a");

        classify(&mut ev, &mut changes, "/principals/users/a", &dir).unwrap();

        assert!(ev.find_attendee("mailto:team@example.com").is_none());
        assert!(ev.find_attendee("mailto:b@example.com").is_some());
        let m1 = ev.find_attendee("mailto:m1@example.com").unwrap();
        assert_eq!(m1.member.as_deref(), Some("mailto:team@example.com"));
        assert!(ev.find_attendee("mailto:m2@example.com").is_some());

        let entry = changes.entry(PropertyIndex::Attendee).unwrap();
        assert_eq!(entry.removed.len(), 1);
        assert_eq!(entry.added.len(), 2);
    }

    #[test]
    fn unexpandable_group_is_left_in_place() {
        let mut dir = MapDirectory::new()
            .with_user("mailto:a@example.com", "/principals/users/a")
            .with_group("mailto:team@example.com", &["m1"]);
        dir.fail_groups = true;

        let mut ev = meeting("mailto:a@example.com", &["mailto:b@example.com"]);
        let mut group = Attendee::new("mailto:team@example.com");
        group.cu_type = CuType::Group;
        ev.add_attendee(group);
        let mut changes = ChangeTable::new("/principals/users/a");

        classify(&mut ev, &mut changes, "/principals/users/a", &dir).unwrap();
        assert!(ev.find_attendee("mailto:team@example.com").is_some());
        assert!(changes.is_empty());
    }

    #[test]
    fn poll_group_expansion_reissues_the_ballot_per_member() {
        let dir = MapDirectory::new()
            .with_user("mailto:a@example.com", "/principals/users/a")
            .with_group("mailto:team@example.com", &["m1", "m2"]);
        let mut ev = meeting("mailto:a@example.com", &["mailto:b@example.com"]);
        ev.entity_type = EntityType::Poll;
        let mut group = Attendee::new("mailto:team@example.com");
        group.cu_type = CuType::Group;
        ev.add_attendee(group);
        ev.poll_ballots.push(PollBallot {
            voter_uri: "mailto:team@example.com".to_string(),
            votes: vec![PollVote {
                item_id: 7,
                response: None,
                comment: None,
            }],
        });
        ev.poll_ballots.push(PollBallot {
            voter_uri: "mailto:b@example.com".to_string(),
            votes: vec![],
        });
        let mut changes = ChangeTable::new("/principals/users/a");

        classify(&mut ev, &mut changes, "/principals/users/a", &dir).unwrap();

        assert!(ev.ballot_for("mailto:team@example.com").is_none());
        assert!(ev.ballot_for("mailto:b@example.com").is_some());
        let m1_ballot = ev.ballot_for("mailto:m1@example.com").unwrap();
        assert_eq!(m1_ballot.votes[0].item_id, 7);
        assert!(ev.ballot_for("mailto:m2@example.com").is_some());
    }
}
