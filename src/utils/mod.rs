mod slug;

pub use slug::batch_custom_id;
