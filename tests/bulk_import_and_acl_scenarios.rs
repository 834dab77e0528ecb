//! End-to-end scenarios exercising the bulk-import pipeline and the ACL
//! evaluator through their public APIs, one test per scenario.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use dsimport::acl::{compile, parse_acl_file, Evaluator};
use dsimport::acl::types::AclResult;
use dsimport::common::{EntryId, Plist};
use dsimport::config::ImportConfig;
use dsimport::contracts::NoopSchemaChecker;
use dsimport::import::job::JobController;
use dsimport::import::ldif::{LdifReader, LdifSource};
use dsimport::import::upgrade::{classify_rdn, conflict_rename, read_conflict_table, ConflictFileWriter};
use dsimport::kvstore::KvEnv;

fn job_env(dir: &std::path::Path, config: &ImportConfig) -> Arc<KvEnv> {
    let instance_dir = dir.join(&config.identity.instance_name);
    Arc::new(KvEnv::open(&instance_dir, 16 + config.indexed_attributes.len() as u32).unwrap())
}

fn sources(ldif: &str) -> Vec<(Box<dyn LdifSource>, String)> {
    let reader = LdifReader::new(Cursor::new(ldif.as_bytes().to_vec()));
    vec![(Box::new(reader) as Box<dyn LdifSource>, "test.ldif".to_string())]
}

fn rooted_config(dir: &std::path::Path) -> ImportConfig {
    let mut config = ImportConfig::default();
    config.identity.instance_name = "userroot".to_string();
    config.identity.suffixes = vec!["dc=x".to_string()];
    config.include_subtrees = vec!["dc=x".to_string()];
    config.db_home = dir.to_path_buf();
    config
}

/// Scenario 1: round-trip LDIF. After import, `id2entry` holds entry 2's
/// exact encoded blob and `entryrdn` maps its DN back to EID 2.
#[test]
fn round_trip_ldif_recovers_entry_by_id_and_dn() {
    let dir = tempfile::tempdir().unwrap();
    let config = rooted_config(dir.path());
    let env = job_env(dir.path(), &config);
    let controller = JobController::new(env.clone(), config);

    // EID 1 is the suffix root itself (the only entry the foreman allows
    // to be parentless); EIDs 2 and 3 are its children, in import order.
    let ldif = "dn: dc=x\nobjectclass: domain\n\ndn: uid=bob,dc=x\ncn: Bob\n\ndn: uid=carol,dc=x\ncn: Carol\n";
    let result = controller.run_bulk_import(sources(ldif), Arc::new(NoopSchemaChecker)).unwrap();
    assert_eq!(result.processed, 3);
    assert_eq!(result.skipped, 0);
    assert!(!result.aborted);

    let rtxn = env.begin_read().unwrap();
    let id2entry = env.open_dbi_ro(&rtxn, "id2entry").unwrap();
    let raw = id2entry.get(&rtxn, &EntryId(2).to_be_bytes()).unwrap().expect("entry 2 present");
    let entry = dsimport::common::Entry::decode(raw).unwrap();
    assert_eq!(entry.dn, "uid=bob,dc=x");

    let entryrdn = env.open_dbi_ro(&rtxn, "entryrdn").unwrap();
    let eid_bytes = entryrdn.get(&rtxn, b"uid=bob,dc=x").unwrap().expect("entryrdn hit");
    assert_eq!(eid_bytes, EntryId(2).to_be_bytes());
}

/// Scenario 2: a duplicate DN in bulk-import mode is skipped, and only the
/// first EID survives in the identity index.
#[test]
fn duplicate_dn_in_bulk_mode_is_skipped_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = rooted_config(dir.path());
    let env = job_env(dir.path(), &config);
    let controller = JobController::new(env.clone(), config);

    let ldif = "dn: dc=x\nobjectclass: domain\n\ndn: uid=bob,dc=x\ncn: Bob One\n\ndn: uid=bob,dc=x\ncn: Bob Two\n";
    let result = controller.run_bulk_import(sources(ldif), Arc::new(NoopSchemaChecker)).unwrap();
    assert_eq!(result.processed, 2);
    assert_eq!(result.skipped, 1);

    let rtxn = env.begin_read().unwrap();
    let entryrdn = env.open_dbi_ro(&rtxn, "entryrdn").unwrap();
    let eid_bytes = entryrdn.get(&rtxn, b"uid=bob,dc=x").unwrap().expect("entryrdn hit");
    assert_eq!(eid_bytes, EntryId(2).to_be_bytes());
}

/// Scenario 3: an RDN with a double-space conflict is detected, recorded
/// in a dry-run conflict file, and the apply-mode rename scheme produces
/// the documented `<rdn> <eid>,<parent>` form.
#[test]
fn upgrade_dn_space_conflict_dry_run_then_apply() {
    let dir = tempfile::tempdir().unwrap();
    let rdn = "cn=alice  smith";
    let status = classify_rdn(rdn);
    assert!(status.contains(dsimport::import::upgrade::DnUpgradeStatus::DN_NORM_SP));

    let mut writer = ConflictFileWriter::create(dir.path(), "userroot").unwrap();
    writer.record(rdn, EntryId(7)).unwrap();
    let path = writer.path().to_path_buf();
    drop(writer);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim(), format!("{rdn}:7"));

    let table = read_conflict_table(&path).unwrap();
    assert!(table.contains_key(&EntryId(7)));

    let normalised = dsimport::import::upgrade::normalise_spaces(rdn);
    let renamed = conflict_rename(&normalised, EntryId(7), "dc=example,dc=com");
    assert_eq!(renamed, "cn=alice smith 7,dc=example,dc=com");
}

/// Scenario 3b: the same double-space conflict, but driven end to end
/// through `JobController::run_upgrade` instead of calling the upgrade
/// helpers directly — dry run flags the RDN, apply mode renames the entry
/// in place, and the rename is visible in `id2entry`/`entryrdn` afterward.
#[test]
fn upgrade_dn_job_controller_dry_run_then_apply_renames_entry_in_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = rooted_config(dir.path());
    let env = job_env(dir.path(), &config);
    let controller = JobController::new(env.clone(), config);

    let ldif = "dn: dc=x\nobjectclass: domain\n\ndn: cn=alice  smith,dc=x\ncn: alice  smith\n";
    let result = controller.run_bulk_import(sources(ldif), Arc::new(NoopSchemaChecker)).unwrap();
    assert_eq!(result.processed, 2);

    let mut dry_config = rooted_config(dir.path());
    dry_config.dry_run = true;
    let dry_controller = JobController::new(env.clone(), dry_config);
    let dry = dry_controller.run_upgrade(dir.path()).unwrap();
    assert_eq!(dry.processed, 1, "the double-space RDN should be the only flagged entry");

    // Apply mode reads its own line format (`<primary-eid>: <conflict-eid>
    // ...`), distinct from the dry-run file above (§6 "Temporary files");
    // EID 2 has no colliding sibling, so it is its own primary and is
    // normalised in place rather than suffix-renamed.
    let conflict_path = dir.path().join("userroot_dn_norm_sp.txt");
    std::fs::write(&conflict_path, "2:\n").unwrap();

    let apply_controller = JobController::new(env.clone(), rooted_config(dir.path()));
    let apply = apply_controller.run_upgrade(dir.path()).unwrap();
    assert_eq!(apply.processed, 1);
    assert!(!apply.aborted);

    let rtxn = env.begin_read().unwrap();
    let id2entry = env.open_dbi_ro(&rtxn, "id2entry").unwrap();
    let raw = id2entry.get(&rtxn, &EntryId(2).to_be_bytes()).unwrap().expect("entry 2 present");
    let entry = dsimport::common::Entry::decode(raw).unwrap();
    assert_eq!(entry.dn, "cn=alice smith,dc=x");
    assert_eq!(entry.first_value_str("cn").as_deref(), Some("alice smith"));

    let entryrdn = env.open_dbi_ro(&rtxn, "entryrdn").unwrap();
    let eid_bytes = entryrdn.get(&rtxn, b"cn=alice smith,dc=x").unwrap().expect("renamed entryrdn hit");
    assert_eq!(eid_bytes, EntryId(2).to_be_bytes());
    assert!(entryrdn.get(&rtxn, b"cn=alice  smith,dc=x").unwrap().is_none(), "old entryrdn key removed");
}

/// Scenario 4: a FIFO ring held down to a single slot (§4.4) forces the
/// producer to wait for each entry to be fully indexed and released before
/// admitting the next one — the tightest backpressure short of refusing
/// entries outright. The job must still complete with every entry durable.
#[test]
fn bulk_import_completes_under_tight_fifo_backpressure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rooted_config(dir.path());
    config.fifo_ring_len = 1;
    let env = job_env(dir.path(), &config);
    let controller = JobController::new(env.clone(), config);

    let mut ldif = String::from("dn: dc=x\nobjectclass: domain\n\n");
    for i in 0..8 {
        ldif.push_str(&format!("dn: uid=u{i},dc=x\ncn: User {i}\n\n"));
    }
    let result = controller.run_bulk_import(sources(&ldif), Arc::new(NoopSchemaChecker)).unwrap();
    assert_eq!(result.processed, 9);
    assert_eq!(result.skipped, 0);
    assert!(!result.aborted);

    let rtxn = env.begin_read().unwrap();
    let entryrdn = env.open_dbi_ro(&rtxn, "entryrdn").unwrap();
    for i in 0..8 {
        let key = format!("uid=u{i},dc=x");
        assert!(entryrdn.get(&rtxn, key.as_bytes()).unwrap().is_some(), "entry {i} missing under backpressure");
    }
}

/// Scenario 5: a job aborted before it starts must short-circuit every
/// thread (producer, foreman, workers, writer) and return promptly rather
/// than hang waiting for a close count an aborted foreman never sends
/// (`Foreman::run` returns before pushing its own `Close` ops once
/// `abort` is observed).
#[test]
fn aborted_bulk_import_returns_promptly_without_processing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let config = rooted_config(dir.path());
    let env = job_env(dir.path(), &config);
    let controller = JobController::new(env.clone(), config);
    controller.abort();

    let ldif = "dn: dc=x\nobjectclass: domain\n\ndn: uid=bob,dc=x\ncn: Bob\n";
    let result = controller.run_bulk_import(sources(ldif), Arc::new(NoopSchemaChecker)).unwrap();
    assert!(result.aborted);
    assert_eq!(result.processed, 0);
}

/// Scenario 6: ACL precedence — order matters absent an absolute clause,
/// and an absolute deny always wins regardless of position.
#[test]
fn acl_precedence_matches_documented_rules() {
    let deny_wins = parse_acl_file(
        r#"version 3.0; acl "t1"; allow (read) user = "uid=alice,dc=x"; deny (read) user = "uid=alice,dc=x";"#,
    )
    .unwrap();
    let allow_wins = parse_acl_file(
        r#"version 3.0; acl "t1"; deny (read) user = "uid=alice,dc=x"; allow (read) user = "uid=alice,dc=x";"#,
    )
    .unwrap();
    let absolute_deny = parse_acl_file(
        r#"version 3.0; acl "t1"; deny absolute (read) user = "uid=alice,dc=x"; allow (read) user = "uid=alice,dc=x";"#,
    )
    .unwrap();

    let check = |clauses: Vec<dsimport::acl::ParsedClause>| {
        let compiled = compile(clauses);
        let mut subject = Plist::new();
        subject.set("user", "uid=alice,dc=x");
        let resource = Plist::new();

        let mut evaluator = Evaluator::new();
        evaluator.set_subject(subject);
        evaluator.set_resource(resource);
        evaluator.set_acl_list(&compiled);
        evaluator.check_rights(&["read"], &HashMap::new()).result
    };

    assert_eq!(check(deny_wins), AclResult::Deny);
    assert_eq!(check(allow_wins), AclResult::Allow);
    assert_eq!(check(absolute_deny), AclResult::Deny);
}
