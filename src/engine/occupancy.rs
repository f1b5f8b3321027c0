use crate::model::*;

use super::interval::days_of;

// ── Occupancy ─────────────────────────────────────────────────────
//
// Stays and blocks occupy `[start, end)`: the checkout day is free, which
// is what lets back-to-back bookings coexist.

/// What occupies `property_id` on `day`, if anything.
///
/// Policy: a block wins over any reservation on the same day. Blocks are
/// set by hand and treated as authoritative over reservation data that may
/// lag behind a channel sync.
pub fn occupant_for(
    property_id: &str,
    day: Day,
    reservations: &[Reservation],
    blocks: &[Block],
) -> Option<Occupant> {
    if let Some(block) = blocks
        .iter()
        .find(|b| b.property_id == property_id && b.span().contains(day))
    {
        return Some(Occupant::Block(block.clone()));
    }
    reservations
        .iter()
        .find(|r| r.property_id == property_id && r.stay().contains(day))
        .map(|r| Occupant::Reservation(r.clone()))
}

/// Every reservation (blocks excluded) covering `day`.
pub fn all_occupants_for<'a>(
    property_id: &'a str,
    day: Day,
    reservations: &'a [Reservation],
) -> impl Iterator<Item = &'a Reservation> + 'a {
    reservations
        .iter()
        .filter(move |r| r.property_id == property_id && r.stay().contains(day))
}

/// Overbooking: more than one reservation on the same day.
pub fn has_conflict(property_id: &str, day: Day, reservations: &[Reservation]) -> bool {
    all_occupants_for(property_id, day, reservations).nth(1).is_some()
}

/// Back-to-back neighbours: another stay on the same property checks out
/// the day this one checks in, or checks in the day this one checks out.
pub fn adjacency(reservation: &Reservation, reservations: &[Reservation]) -> Adjacency {
    let mut adj = Adjacency::default();
    for other in reservations {
        if other.id == reservation.id || other.property_id != reservation.property_id {
            continue;
        }
        if other.check_out == reservation.check_in {
            adj.has_prev = true;
        }
        if other.check_in == reservation.check_out {
            adj.has_next = true;
        }
    }
    adj
}

/// Every conflicting day in `range` for one property, in date order.
///
/// Returns all conflicts, never a sample.
pub fn conflicts_in_range(
    property_id: &str,
    range: &DateRange,
    reservations: &[Reservation],
) -> Vec<ConflictReport> {
    let relevant: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.property_id == property_id && r.stay().overlaps(range))
        .collect();
    if relevant.len() < 2 {
        return Vec::new();
    }

    let mut reports = Vec::new();
    for day in days_of(range) {
        let ids: Vec<String> = relevant
            .iter()
            .filter(|r| r.stay().contains(day))
            .map(|r| r.id.clone())
            .collect();
        if ids.len() > 1 {
            reports.push(ConflictReport {
                property_id: property_id.to_string(),
                date: day,
                reservation_ids: ids,
            });
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::interval::parse_day;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn res(id: &str, property: &str, check_in: &str, check_out: &str) -> Reservation {
        Reservation {
            id: id.into(),
            property_id: property.into(),
            check_in: d(check_in),
            check_out: d(check_out),
            status: ReservationStatus::Confirmed,
            platform: None,
        }
    }

    fn block(id: &str, property: &str, start: &str, end: &str) -> Block {
        Block {
            id: id.into(),
            property_id: property.into(),
            start_date: d(start),
            end_date: d(end),
            kind: Some(BlockKind::Maintenance),
            reason: Some("pool repair".into()),
            notes: None,
        }
    }

    #[test]
    fn checkout_day_is_free() {
        let r = res("r1", "p", "2026-02-10", "2026-02-13");
        let all = [r.clone()];
        for day in ["2026-02-10", "2026-02-11", "2026-02-12"] {
            assert_eq!(occupant_for("p", d(day), &all, &[]), Some(Occupant::Reservation(r.clone())));
        }
        assert_eq!(occupant_for("p", d("2026-02-13"), &all, &[]), None);
        assert_eq!(occupant_for("p", d("2026-02-09"), &all, &[]), None);
    }

    #[test]
    fn other_property_not_occupied() {
        let all = [res("r1", "p", "2026-02-10", "2026-02-13")];
        assert_eq!(occupant_for("q", d("2026-02-11"), &all, &[]), None);
    }

    #[test]
    fn block_takes_precedence_over_reservation() {
        let r = res("r1", "p", "2026-02-10", "2026-02-13");
        let b = block("b1", "p", "2026-02-12", "2026-02-15");
        let occupant = occupant_for("p", d("2026-02-12"), &[r.clone()], &[b.clone()]);
        assert_eq!(occupant, Some(Occupant::Block(b.clone())));
        // Before the block starts the reservation shows through
        let occupant = occupant_for("p", d("2026-02-11"), &[r.clone()], &[b.clone()]);
        assert_eq!(occupant.map(|o| o.id().to_string()), Some("r1".to_string()));
        // Block end is exclusive too
        assert_eq!(occupant_for("p", d("2026-02-15"), &[], &[b]), None);
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let r1 = res("r1", "p", "2026-02-10", "2026-02-13");
        let r2 = res("r2", "p", "2026-02-13", "2026-02-15");
        assert!(!has_conflict("p", d("2026-02-13"), &[r1, r2]));
    }

    #[test]
    fn overlap_is_a_conflict() {
        let r3 = res("r3", "p", "2026-02-10", "2026-02-14");
        let r4 = res("r4", "p", "2026-02-12", "2026-02-16");
        assert!(has_conflict("p", d("2026-02-13"), &[r3.clone(), r4.clone()]));
        assert!(!has_conflict("p", d("2026-02-11"), &[r3.clone(), r4.clone()]));
        assert!(!has_conflict("p", d("2026-02-14"), &[r3, r4]));
    }

    #[test]
    fn conflict_is_symmetric() {
        let a = res("a", "p", "2026-02-10", "2026-02-14");
        let b = res("b", "p", "2026-02-12", "2026-02-16");
        let day = d("2026-02-13");
        assert!(has_conflict("p", day, &[a.clone(), b.clone()]));
        assert!(has_conflict("p", day, &[b.clone(), a.clone()]));
        assert!(!has_conflict("p", day, &[a]));
        assert!(!has_conflict("p", day, &[b]));
    }

    #[test]
    fn blocks_do_not_count_toward_conflicts() {
        let a = res("a", "p", "2026-02-10", "2026-02-14");
        let reservations = [a];
        let occupants: Vec<_> = all_occupants_for("p", d("2026-02-11"), &reservations).collect();
        assert_eq!(occupants.len(), 1);
    }

    #[test]
    fn adjacency_detects_neighbours() {
        let before = res("before", "p", "2026-02-08", "2026-02-10");
        let stay = res("stay", "p", "2026-02-10", "2026-02-13");
        let after = res("after", "p", "2026-02-13", "2026-02-15");
        let elsewhere = res("elsewhere", "q", "2026-02-13", "2026-02-15");
        let all = [before.clone(), stay.clone(), after.clone(), elsewhere];

        assert_eq!(adjacency(&stay, &all), Adjacency { has_prev: true, has_next: true });
        assert_eq!(adjacency(&before, &all), Adjacency { has_prev: false, has_next: true });
        assert_eq!(adjacency(&after, &all), Adjacency { has_prev: true, has_next: false });
    }

    #[test]
    fn adjacency_gap_is_not_adjacent() {
        let a = res("a", "p", "2026-02-08", "2026-02-10");
        let b = res("b", "p", "2026-02-11", "2026-02-13");
        assert_eq!(adjacency(&b, &[a.clone(), b.clone()]), Adjacency::default());
    }

    #[test]
    fn conflicts_in_range_reports_every_day() {
        let r3 = res("r3", "p", "2026-02-10", "2026-02-14");
        let r4 = res("r4", "p", "2026-02-12", "2026-02-16");
        let r5 = res("r5", "p", "2026-02-13", "2026-02-14");
        let range = DateRange::new(d("2026-02-01"), d("2026-03-01")).unwrap();
        let reports = conflicts_in_range("p", &range, &[r3, r4, r5]);
        let days: Vec<_> = reports.iter().map(|r| r.date).collect();
        assert_eq!(days, vec![d("2026-02-12"), d("2026-02-13")]);
        assert_eq!(reports[1].reservation_ids, vec!["r3", "r4", "r5"]);
    }

    #[test]
    fn time_of_day_inputs_compare_as_dates() {
        let r = Reservation {
            id: "r".into(),
            property_id: "p".into(),
            check_in: parse_day("2026-02-10T15:00:00-03:00").unwrap(),
            check_out: parse_day("2026-02-13T11:00:00-03:00").unwrap(),
            status: ReservationStatus::Pending,
            platform: Some("booking".into()),
        };
        let all = [r];
        assert!(occupant_for("p", parse_day("2026-02-12T23:00:00Z").unwrap(), &all, &[]).is_some());
        assert!(occupant_for("p", parse_day("2026-02-13T00:30:00Z").unwrap(), &all, &[]).is_none());
    }
}
