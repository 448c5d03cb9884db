//! Integration tests for the sync server over its HTTP contract.

use ensync_protocol::http::{self, Credentials, ErrorKind, ErrorResponse, RequestDispatch};
use ensync_protocol::{
    ChangesResponse, DocId, EncryptedEnvelope, EnvelopeScheme, Generation, GetChangesRequest,
    Lineage, PutOutcome, RecordCheckpointRequest, RecordCheckpointResponse, ReplicaId,
    SendDocumentRequest, SendDocumentResponse, SyncInfo, SyncInfoRequest, TransactionId,
    WireDocument, WireLeaf, WireMessage,
};
use ensync_sync_server::{ServerConfig, SyncServer};
use tempfile::tempdir;

fn post<Req: WireMessage, Resp: WireMessage>(
    server: &SyncServer,
    replica: &str,
    endpoint: &str,
    credentials: Option<&Credentials>,
    request: &Req,
) -> Result<Resp, ErrorResponse> {
    let response = server.dispatch(
        &http::replica_path(replica, endpoint),
        credentials,
        &request.encode().unwrap(),
    );
    if response.is_success() {
        Ok(Resp::decode(&response.body).unwrap())
    } else {
        Err(ErrorResponse::decode(&response.body).unwrap())
    }
}

fn envelope(byte: u8) -> EncryptedEnvelope {
    EncryptedEnvelope {
        scheme: EnvelopeScheme::Aes256GcmHmacSha256,
        nonce: vec![byte; 12],
        ciphertext: vec![byte; 40],
        mac: vec![byte; 32],
    }
}

fn document(source: &str, doc: &str, byte: u8, generation: u64) -> SendDocumentRequest {
    SendDocumentRequest {
        source_replica: ReplicaId::new(source),
        document: WireDocument {
            doc_id: DocId::new(doc),
            current: WireLeaf {
                lineage: Lineage::root(&[byte; 32], false),
                envelope: Some(envelope(byte)),
            },
            conflicts: Vec::new(),
        },
        source_generation: Generation(generation),
        source_transaction_id: TransactionId::new(format!("{source}-{generation}")),
    }
}

#[test]
fn push_then_pull_over_dispatch() {
    let server = SyncServer::new(ServerConfig::default());
    let hello = SyncInfoRequest::new(ReplicaId::new("laptop"), true);
    let info: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &hello).unwrap();
    assert_eq!(info.target_generation, Generation::ZERO);

    for (i, doc) in ["a", "b", "c"].iter().enumerate() {
        let sent: SendDocumentResponse = post(
            &server,
            "notes",
            http::DOCUMENTS,
            None,
            &document("laptop", doc, i as u8 + 1, i as u64 + 1),
        )
        .unwrap();
        assert_eq!(sent.outcome, PutOutcome::Applied);
        assert_eq!(sent.target_generation, Generation(i as u64 + 1));
    }

    let request = GetChangesRequest::new(ReplicaId::new("phone"), Generation::ZERO, 2);
    let page: ChangesResponse = post(&server, "notes", http::CHANGES, None, &request).unwrap();
    assert_eq!(page.changes.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.target_generation, Generation(3));

    let request = GetChangesRequest::new(ReplicaId::new("phone"), Generation(2), 2);
    let page: ChangesResponse = post(&server, "notes", http::CHANGES, None, &request).unwrap();
    assert_eq!(page.changes.len(), 1);
    assert!(!page.has_more);
    assert_eq!(page.changes[0].document.doc_id, DocId::new("c"));
    assert_eq!(
        page.changes[0].document.current.envelope,
        Some(envelope(3))
    );

    let record = RecordCheckpointRequest {
        source_replica: ReplicaId::new("phone"),
        generation: Generation(7),
        transaction_id: TransactionId::new("phone-7"),
    };
    let recorded: RecordCheckpointResponse =
        post(&server, "notes", http::CHECKPOINT, None, &record).unwrap();
    assert!(recorded.recorded);

    let phone = SyncInfoRequest::new(ReplicaId::new("phone"), false);
    let info: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &phone).unwrap();
    assert_eq!(info.source_generation, Generation(7));
    assert_eq!(info.source_transaction_id, TransactionId::new("phone-7"));

    let info: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &hello).unwrap();
    assert_eq!(info.source_generation, Generation(3));
}

#[test]
fn checked_generation_reports_transaction() {
    let server = SyncServer::new(ServerConfig::default());
    let hello = SyncInfoRequest::new(ReplicaId::new("laptop"), true);
    let _: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &hello).unwrap();
    let _: SendDocumentResponse = post(
        &server,
        "notes",
        http::DOCUMENTS,
        None,
        &document("laptop", "a", 1, 1),
    )
    .unwrap();
    let latest: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &hello).unwrap();

    let checking = hello.clone().checking(Generation(1));
    let info: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &checking).unwrap();
    assert_eq!(
        info.checked_transaction_id,
        Some(latest.target_transaction_id)
    );

    let beyond = hello.checking(Generation(9));
    let info: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &beyond).unwrap();
    assert_eq!(info.checked_transaction_id, None);
}

#[test]
fn authenticated_users_reach_only_their_replicas() {
    let server = SyncServer::new(ServerConfig::default().with_auth(b"integration-secret".to_vec()));
    let token = server.create_token("42").unwrap();
    let user = Credentials::new("42", token);
    let hello = SyncInfoRequest::new(ReplicaId::new("laptop"), true);

    let own: Result<SyncInfo, _> = post(&server, "user-42", http::SYNC_INFO, Some(&user), &hello);
    assert!(own.is_ok());
    let sub: Result<SyncInfo, _> =
        post(&server, "user-42-work", http::SYNC_INFO, Some(&user), &hello);
    assert!(sub.is_ok());

    let other: Result<SyncInfo, _> =
        post(&server, "user-7", http::SYNC_INFO, Some(&user), &hello);
    assert_eq!(other.unwrap_err().kind, ErrorKind::Forbidden);

    let anonymous: Result<SyncInfo, _> = post(&server, "user-42", http::SYNC_INFO, None, &hello);
    assert_eq!(anonymous.unwrap_err().kind, ErrorKind::Unauthorized);

    let impostor = Credentials::new("7", user.token.clone());
    let stolen: Result<SyncInfo, _> =
        post(&server, "user-7", http::SYNC_INFO, Some(&impostor), &hello);
    assert_eq!(stolen.unwrap_err().kind, ErrorKind::Unauthorized);
}

#[test]
fn invalid_names_are_rejected() {
    let server = SyncServer::new(ServerConfig::default());
    let hello = SyncInfoRequest::new(ReplicaId::new("laptop"), true);
    let result: Result<SyncInfo, _> = post(&server, "bad.name", http::SYNC_INFO, None, &hello);
    assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidRequest);
    assert!(server.registry().names().is_empty());
}

#[test]
fn file_backed_server_survives_restart() {
    let dir = tempdir().unwrap();
    let config = ServerConfig::default().with_data_dir(dir.path());
    let hello = SyncInfoRequest::new(ReplicaId::new("laptop"), true);

    let before = {
        let server = SyncServer::new(config.clone());
        let _: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &hello).unwrap();
        let _: SendDocumentResponse = post(
            &server,
            "notes",
            http::DOCUMENTS,
            None,
            &document("laptop", "a", 1, 4),
        )
        .unwrap();
        post::<_, SyncInfo>(&server, "notes", http::SYNC_INFO, None, &hello).unwrap()
    };

    let server = SyncServer::new(config);
    let lookup = SyncInfoRequest::new(ReplicaId::new("laptop"), false);
    let after: SyncInfo = post(&server, "notes", http::SYNC_INFO, None, &lookup).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.target_generation, Generation(1));
    assert_eq!(after.source_generation, Generation(4));

    let request = GetChangesRequest::new(ReplicaId::new("phone"), Generation::ZERO, 10);
    let page: ChangesResponse = post(&server, "notes", http::CHANGES, None, &request).unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].document.current.envelope, Some(envelope(1)));
}
