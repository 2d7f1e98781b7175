// @generated
pub mod work_queue;
