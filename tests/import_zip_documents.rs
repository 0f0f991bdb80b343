mod test_support;

use serde_json::json;
use std::io::{BufReader, Cursor, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout};
use test_support::{request, request_ok, spawn_sidecar, temp_dir};
use zip::write::FileOptions;
use zip::ZipWriter;

const HEADER: &str = "registration_no,certificate_id,full_name,gender,phone_number,department,faculty,academic_year,gpa,grade,graduation_date,status";

fn write_zip(path: &PathBuf, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(*name, FileOptions::default())
            .expect("start entry");
        zip.write_all(bytes).expect("write entry");
    }
    let bytes = zip.finish().expect("finish zip").into_inner();
    std::fs::write(path, bytes).expect("write zip");
}

fn open_seeded_workspace(prefix: &str) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "f", "faculties.create", json!({ "name": "Science" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "departments.create",
        json!({ "name": "Computer Science" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "y",
        "academicYears.create",
        json!({ "name": "2023/2024" }),
    );
    (workspace, child, stdin, reader)
}

#[test]
fn apply_with_archive_attaches_photo_and_skips_readme() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("credentiald-zip-apply");

    let csv = workspace.join("batch.csv");
    std::fs::write(
        &csv,
        format!(
            "{HEADER}\nGRW-BCS-2005,CERT-2005,Hauwa Musa,FEMALE,,Computer Science,Science,2023/2024,3.8,First,2024-07-01,CLEARED\n"
        ),
    )
    .expect("write csv");
    let archive = workspace.join("docs.zip");
    write_zip(
        &archive,
        &[
            ("Photo/GRW-BCS-2005.jpg", b"jpeg-bytes"),
            ("readme.txt", b"see folders"),
        ],
    );

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.applyCsv",
        json!({ "inPath": csv.to_string_lossy(), "zipPath": archive.to_string_lossy() }),
    );
    assert_eq!(applied["createdCount"], json!(1));
    assert_eq!(applied["documents"]["uploaded"], json!(1));
    assert_eq!(applied["documents"]["failed"], json!(0));
    assert_eq!(applied["documents"]["skippedEntries"], json!(["readme.txt"]));
    assert_eq!(
        applied["documents"]["results"][0]["fileName"],
        json!("GRW-BCS-2005.jpg")
    );

    let docs = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "documents.list",
        json!({ "registrationId": "GRW-BCS-2005" }),
    );
    let list = docs["documents"].as_array().expect("documents");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["documentType"], json!("PHOTO"));
    assert_eq!(list[0]["status"], json!("PENDING"));
    assert_eq!(list[0]["sizeBytes"], json!(10));
    let stored_path = PathBuf::from(list[0]["storedPath"].as_str().expect("stored path"));
    assert_eq!(std::fs::read(&stored_path).expect("read stored"), b"jpeg-bytes");
    assert!(stored_path.starts_with(workspace.join("documents")));

    let doc_id = list[0]["id"].as_str().expect("doc id").to_string();
    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "documents.setStatus",
        json!({ "documentId": doc_id, "status": "verified" }),
    );
    assert_eq!(verified["document"]["status"], json!("VERIFIED"));

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "4",
        "documents.setStatus",
        json!({ "documentId": doc_id, "status": "LOST" }),
    );
    assert_eq!(bad_status["error"]["code"], json!("bad_params"));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "documents.delete",
        json!({ "documentId": doc_id }),
    );
    assert_eq!(deleted["deleted"], json!(true));
    assert!(!stored_path.exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn broken_archive_after_commit_is_reported_without_rollback() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("credentiald-zip-broken");

    let csv = workspace.join("batch.csv");
    std::fs::write(
        &csv,
        format!(
            "{HEADER}\nGRW-BCS-6001,,Ike Nna,MALE,,Computer Science,Science,2023/2024,3.0,Second,2024-07-01,CLEARED\n"
        ),
    )
    .expect("write csv");
    let archive = workspace.join("broken.zip");
    std::fs::write(&archive, b"definitely not a zip").expect("write broken zip");

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.applyCsv",
        json!({ "inPath": csv.to_string_lossy(), "zipPath": archive.to_string_lossy() }),
    );
    assert_eq!(applied["createdCount"], json!(1));
    assert_eq!(applied["documents"]["error"]["code"], json!("malformed_file"));

    let preview = request(
        &mut stdin,
        &mut reader,
        "2",
        "import.previewZip",
        json!({ "zipPath": archive.to_string_lossy() }),
    );
    assert_eq!(preview["error"]["code"], json!("malformed_file"));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "registrationId": "GRW-BCS-6001" }),
    );
    assert_eq!(student["student"]["fullName"], json!("Ike Nna"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn standalone_archive_matches_existing_students() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("credentiald-zip-standalone");

    let csv = workspace.join("batch.csv");
    std::fs::write(
        &csv,
        format!(
            "{HEADER}\nGRW-BCS-7001,,Jide Ola,MALE,,Computer Science,Science,2023/2024,3.0,Second,2024-07-01,CLEARED\nGRW-BCS-7002,,Kemi Ola,FEMALE,,Computer Science,Science,2023/2024,3.2,Second,2024-07-01,CLEARED\n"
        ),
    )
    .expect("write csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.applyCsv",
        json!({ "inPath": csv.to_string_lossy() }),
    );

    let archive = workspace.join("later.zip");
    write_zip(
        &archive,
        &[
            ("Transcript/GRW-BCS-7001.pdf", b"transcript"),
            ("Certificates/GRW-BCS-7002.pdf", b"certificate"),
            ("Photo/grw-bcs-7002.png", b"lowercase"),
            ("Photo/GRW-BCS-9999.jpg", b"stranger"),
        ],
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.previewZip",
        json!({ "zipPath": archive.to_string_lossy() }),
    );
    let associations = preview["associations"].as_array().expect("associations");
    assert_eq!(associations.len(), 2);
    assert_eq!(associations[0]["documentType"], json!("TRANSCRIPT"));
    assert_eq!(associations[1]["documentType"], json!("CERTIFICATE"));
    assert_eq!(preview["skippedEntries"].as_array().map(|s| s.len()), Some(2));

    // Restricting the ids narrows the match.
    let narrowed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.previewZip",
        json!({ "zipPath": archive.to_string_lossy(), "registrationIds": ["GRW-BCS-7001"] }),
    );
    assert_eq!(narrowed["associations"].as_array().map(|a| a.len()), Some(1));

    let relaxed = request_ok(
        &mut stdin,
        &mut reader,
        "3b",
        "import.previewZip",
        json!({ "zipPath": archive.to_string_lossy(), "caseInsensitive": true }),
    );
    assert_eq!(relaxed["associations"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(relaxed["associations"][2]["registrationId"], json!("GRW-BCS-7002"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "import": { "documentMatchCaseInsensitive": true } }),
    );
    let uploaded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.uploadZip",
        json!({ "zipPath": archive.to_string_lossy() }),
    );
    assert_eq!(uploaded["uploaded"], json!(3));
    assert_eq!(uploaded["skippedEntries"], json!(["Photo/GRW-BCS-9999.jpg"]));

    let docs = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "documents.list",
        json!({ "registrationId": "GRW-BCS-7002" }),
    );
    assert_eq!(docs["documents"].as_array().map(|d| d.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn single_document_upload_replaces_same_name() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("credentiald-doc-upload");

    let list = request_ok(&mut stdin, &mut reader, "1", "faculties.list", json!({}));
    let faculty_id = list["items"][0]["id"].clone();
    let list = request_ok(&mut stdin, &mut reader, "2", "departments.list", json!({}));
    let department_id = list["items"][0]["id"].clone();
    let list = request_ok(&mut stdin, &mut reader, "3", "academicYears.list", json!({}));
    let year_id = list["items"][0]["id"].clone();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "student": {
                "registrationId": "GRW-BCS-8001",
                "fullName": "Lola Bello",
                "facultyId": faculty_id,
                "departmentId": department_id,
                "academicYearId": year_id
            }
        }),
    );

    let file = workspace.join("scan.pdf");
    std::fs::write(&file, b"first scan").expect("write scan");
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "documents.upload",
        json!({
            "registrationId": "GRW-BCS-8001",
            "documentType": "supporting",
            "inPath": file.to_string_lossy()
        }),
    );
    assert_eq!(first["document"]["fileName"], json!("scan.pdf"));
    let first_id = first["document"]["id"].clone();
    let doc_id = first_id.as_str().expect("doc id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "documents.setStatus",
        json!({ "documentId": doc_id, "status": "REJECTED" }),
    );

    std::fs::write(&file, b"second, clearer scan").expect("rewrite scan");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "documents.upload",
        json!({
            "registrationId": "GRW-BCS-8001",
            "documentType": "SUPPORTING",
            "inPath": file.to_string_lossy()
        }),
    );
    assert_eq!(second["document"]["id"], first_id);
    assert_eq!(second["document"]["status"], json!("PENDING"));
    assert_eq!(second["document"]["sizeBytes"], json!(20));

    let missing = request(
        &mut stdin,
        &mut reader,
        "8",
        "documents.upload",
        json!({
            "registrationId": "GRW-BCS-0000",
            "documentType": "PHOTO",
            "inPath": file.to_string_lossy()
        }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "9",
        "documents.upload",
        json!({
            "registrationId": "GRW-BCS-8001",
            "documentType": "PASSPORT",
            "inPath": file.to_string_lossy()
        }),
    );
    assert_eq!(bad_type["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
