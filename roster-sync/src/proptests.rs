#[cfg(test)]
mod proptests {
    use crate::engine::ReconciliationEngine;
    use crate::memory::{InMemoryDirectory, InMemoryMembershipStore};
    use crate::types::{ExternalCourseMapping, ExternalMember, NewInstance};
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #[test]
        fn test_runs_converge_and_repeat(
            known in prop::collection::btree_set("[a-f][0-9]", 0..8),
            first in prop::collection::vec("[a-f][0-9]", 0..12),
            second in prop::collection::vec("[a-f][0-9]", 0..12)
        ) {
            block_on(async {
                let directory = Arc::new(InMemoryDirectory::new());
                let memberships = Arc::new(InMemoryMembershipStore::new());
                for id in &known {
                    directory.add_account(id).await;
                }
                let engine = ReconciliationEngine::new(directory.clone(), memberships.clone());
                let instance = NewInstance::for_course(1, "p").into_instance(1, None);
                let roster = |ids: &[String]| ids.iter().map(ExternalMember::new).collect::<Vec<_>>();

                let run = engine.reconcile(&instance, &roster(&first), None, None, Utc::now()).await;
                let expected: BTreeSet<String> = first.iter().filter(|id| known.contains(*id)).cloned().collect();
                prop_assert_eq!(&run.state.success, &expected);
                prop_assert!(run.state.success.iter().all(|id| !run.state.errors.contains_key(id)));

                let records_before = memberships.records().await.len();
                let next = engine.reconcile(&instance, &roster(&second), None, Some(&run.state), Utc::now()).await;
                prop_assert!(memberships.records().await.len() >= records_before);

                let again = engine.reconcile(&instance, &roster(&second), None, Some(&next.state), Utc::now()).await;
                prop_assert_eq!(next.state.data(), again.state.data());
                Ok(())
            })?;
        }

        #[test]
        fn test_selection_key_parses_back(
            term in "[0-9]{4}",
            id in "[A-Z0-9-]{1,10}",
            college in "[^~]{0,12}",
            course in "[^~]{0,12}",
            capacity in 0u32..500
        ) {
            let mapping = ExternalCourseMapping {
                term,
                external_course_id: id,
                college_name: college,
                course_name: course,
                student_capacity: capacity
            };
            let parsed = ExternalCourseMapping::from_selection_key(&mapping.selection_key()).unwrap();
            prop_assert_eq!(parsed, mapping);
        }
    }
}
