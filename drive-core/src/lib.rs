mod client;

pub use reqwest::StatusCode;

pub use client::{
    ApiErrorBody, ApiErrorDetail, ChildFilter, DriveClient, DriveError, DriveFile,
    DriveOwner, FOLDER_MIME_TYPE, FileList, FileUpdate, Permission, SharedDrive, SharedDriveList,
};
