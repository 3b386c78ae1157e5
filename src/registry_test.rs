use super::*;

fn registry_with(ids: &[u64]) -> (AckRegistry<u64>, Vec<AckFuture<u64>>) {
    let registry = AckRegistry::new();
    let futures = ids
        .iter()
        .map(|id| registry.register(*id).expect("register"))
        .collect();
    (registry, futures)
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = AckRegistry::new();
    let _first = registry.register(1_u64).expect("first register");
    let err = registry.register(1).err().expect("duplicate should fail");
    assert!(matches!(err, ClientError::DuplicateAckId(ref id) if id == "1"));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn successful_ack_resolves_entry() {
    let (registry, mut futures) = registry_with(&[7]);
    assert!(registry.acknowledge(&7, true, None));
    let acked = futures.remove(0).await.expect("ack should succeed");
    assert_eq!(
        acked,
        Acked {
            ack_id: 7,
            duplicate: false
        }
    );
    assert!(registry.is_empty());
}

#[tokio::test]
async fn duplicate_error_counts_as_success() {
    let (registry, mut futures) = registry_with(&[2]);
    registry.acknowledge(&2, false, Some(AckFailure::new("Duplicate", None)));
    let acked = futures.remove(0).await.expect("duplicate is success");
    assert!(acked.duplicate);
}

#[tokio::test]
async fn server_rejection_carries_error_detail() {
    let (registry, mut futures) = registry_with(&[4]);
    registry.acknowledge(
        &4,
        false,
        Some(AckFailure::new("Forbidden", Some("no".to_owned()))),
    );
    let err = futures.remove(0).await.expect_err("rejected");
    assert_eq!(
        err,
        AckError::Rejected {
            name: "Forbidden".to_owned(),
            message: Some("no".to_owned())
        }
    );
}

#[tokio::test]
async fn cumulative_rule_fails_earlier_entries() {
    let (registry, futures) = registry_with(&[1, 2, 3, 4, 5]);
    let mut futures = futures.into_iter();
    let (f1, f2, f3, f4, f5) = (
        futures.next().expect("f1"),
        futures.next().expect("f2"),
        futures.next().expect("f3"),
        futures.next().expect("f4"),
        futures.next().expect("f5"),
    );

    assert!(registry.acknowledge(&3, true, None));
    assert_eq!(f1.await, Err(AckError::Superseded));
    assert_eq!(f2.await, Err(AckError::Superseded));
    assert!(f3.await.is_ok());
    assert_eq!(registry.len(), 2);

    assert!(registry.acknowledge(&5, true, None));
    assert_eq!(f4.await, Err(AckError::Superseded));
    assert!(f5.await.is_ok());

    assert!(!registry.acknowledge(&4, true, None));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unknown_ack_still_applies_cumulative_rule() {
    let (registry, mut futures) = registry_with(&[1, 9]);
    assert!(!registry.acknowledge(&5, true, None));
    assert_eq!(futures.remove(0).await, Err(AckError::Superseded));
    assert!(registry.contains(&9));
}

#[test]
fn late_ack_after_cleanup_is_a_no_op() {
    let (registry, _futures) = registry_with(&[1]);
    assert_eq!(registry.reject_all(AckError::Timeout), 1);
    assert!(!registry.acknowledge(&1, true, None));
    assert!(!registry.fail(&1, AckError::Timeout));
}

#[tokio::test]
async fn reject_all_fails_every_entry_with_reason() {
    let (registry, futures) = registry_with(&[1, 2, 3]);
    assert_eq!(registry.reject_all(AckError::Closed), 3);
    for future in futures {
        assert_eq!(future.await, Err(AckError::Closed));
    }
    assert_eq!(registry.reject_all(AckError::Closed), 0);
}

#[tokio::test]
async fn fail_resolves_single_entry() {
    let (registry, mut futures) = registry_with(&[1, 2]);
    assert!(registry.fail(&2, AckError::NotConnected));
    assert_eq!(futures.remove(1).await, Err(AckError::NotConnected));
    assert!(registry.contains(&1));
}

#[tokio::test]
async fn dropped_registry_resolves_pending_as_closed() {
    let (registry, mut futures) = registry_with(&[1]);
    drop(registry);
    assert_eq!(futures.remove(0).await, Err(AckError::Closed));
}

#[tokio::test]
async fn string_ids_order_lexicographically() {
    let registry = AckRegistry::new();
    let early = registry
        .register("00000000000000000009".to_owned())
        .expect("register");
    let late = registry
        .register("00000000000000000010".to_owned())
        .expect("register");

    registry.acknowledge(&"00000000000000000010".to_owned(), true, None);
    assert_eq!(early.await, Err(AckError::Superseded));
    assert!(late.await.is_ok());
}

#[test]
fn reregistered_id_gets_a_new_ticket() {
    let registry = AckRegistry::new();
    let first = registry.register(1_u64).expect("register");
    assert!(registry.is_pending(&1, first.ticket()));

    registry.acknowledge(&1, false, Some(AckFailure::new("InternalServerError", None)));
    assert!(!registry.is_pending(&1, first.ticket()));

    let retry = registry.register(1).expect("register again");
    assert_ne!(retry.ticket(), first.ticket());
    assert!(registry.is_pending(&1, retry.ticket()));
    assert!(!registry.is_pending(&1, first.ticket()));
    assert!(!registry.is_pending(&2, retry.ticket()));
}
