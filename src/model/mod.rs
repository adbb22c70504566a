pub mod issue;
pub mod wiki_page;
pub mod work_item;
