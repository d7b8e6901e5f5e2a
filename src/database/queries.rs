macro_rules! post_columns {
    () => {
        "num, parent, timestamp, lasthit, ip, date, name, trip, email, subject, password, comment, image, size, md5, width, height, thumbnail, tn_width, tn_height, lastedit, lastedit_ip, admin_post, stickied, locked"
    };
}

pub static NEXT_NUM: &str = "insert into board_counters(board, last_num) values (?1, 1) on conflict(board) do update set last_num = last_num + 1 returning last_num";
pub static RAISE_COUNTER: &str = "insert into board_counters(board, last_num) values (?1, ?2) on conflict(board) do update set last_num = max(last_num, ?2)";

pub static INSERT_POST: &str = concat!(
    "insert into posts(board, ",
    post_columns!(),
    ") values (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)"
);
pub static SELECT_POST: &str = concat!("select ", post_columns!(), " from posts where board = ? and num = ?");
pub static SELECT_THREAD: &str = concat!(
    "select ",
    post_columns!(),
    " from posts where board = ?1 and (num = ?2 or parent = ?2) order by parent <> 0, num"
);
pub static SELECT_THREAD_ROOTS: &str = concat!(
    "select ",
    post_columns!(),
    " from posts where board = ? and parent = 0 order by stickied desc, lasthit desc, num asc"
);
pub static SELECT_POSTS_BY_IP: &str = "select num from posts where board = ? and ip = ? order by num desc";
pub static SELECT_PARENT: &str = "select parent from posts where board = ? and num = ?";

pub static COUNT_RECENT_BY_IP: &str = "select count(*) from posts where board = ? and ip = ? and timestamp > ?";
pub static COUNT_REPEATS: &str = "select count(*) from posts where board = ? and ip = ? and comment = ? and timestamp > ?";
pub static COUNT_RECENT_REPORTS: &str = "select count(*) from reports where reporter = ? and timestamp > ?";

pub static FIND_MD5_BOARD: &str = "select num, parent from posts where board = ? and md5 = ? limit 1";
pub static FIND_MD5_THREAD: &str = "select num, parent from posts where board = ?1 and md5 = ?2 and (parent = ?3 or num = ?3) limit 1";
pub static IMAGE_IN_USE: &str = "select 1 from posts where board = ? and image = ?";

pub static BUMP_THREAD: &str = "update posts set lasthit = ?3 where board = ?1 and (num = ?2 or parent = ?2)";
pub static SAGE_COUNT: &str = "select count(*) from posts where board = ?1 and parent = ?2 and not (timestamp < ?3 and ip = ?4)";
pub static SET_LOCKED: &str = "update posts set locked = ?3 where board = ?1 and (num = ?2 or parent = ?2)";
pub static SET_STICKIED: &str = "update posts set stickied = ?3 where board = ?1 and (num = ?2 or parent = ?2)";

pub static UPDATE_POST: &str = "update posts set name = ?3, trip = ?4, email = ?5, subject = ?6, comment = ?7, image = ?8, size = ?9, md5 = ?10, width = ?11, height = ?12, thumbnail = ?13, tn_width = ?14, tn_height = ?15, lastedit = ?16, lastedit_ip = ?17 where board = ?1 and num = ?2";
pub static CLEAR_FILE: &str = "update posts set image = null, size = 0, md5 = null, width = 0, height = 0, thumbnail = null, tn_width = 0, tn_height = 0 where board = ? and num = ?";
pub static DELETE_POST: &str = "delete from posts where board = ? and num = ?";

pub static COUNT_THREADS: &str = "select count(*) from posts where board = ? and parent = 0";
pub static COUNT_POSTS: &str = "select count(*) from posts where board = ?";
pub static SUM_FILE_SIZES: &str = "select coalesce(sum(size), 0) from posts where board = ?";
pub static OLDEST_THREAD_BY_NUM: &str = "select num, timestamp from posts where board = ? and parent = 0 and stickied = 0 order by num asc limit 1";
pub static OLDEST_THREAD_BY_LASTHIT: &str = "select num, timestamp from posts where board = ? and parent = 0 and stickied = 0 order by lasthit asc, num asc limit 1";

pub static INSERT_BACKUP: &str = concat!(
    "insert into backups(board, ",
    post_columns!(),
    ", archived_at) values (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27)"
);
pub static SELECT_BACKUP: &str = concat!("select id, board, archived_at, ", post_columns!(), " from backups where id = ?");
pub static SELECT_BACKUP_REPLIES: &str = concat!(
    "select id, board, archived_at, ",
    post_columns!(),
    " from backups where board = ? and parent = ? order by num"
);
pub static SELECT_EXPIRED_BACKUPS: &str = concat!(
    "select id, board, archived_at, ",
    post_columns!(),
    " from backups where archived_at <= ? order by id"
);
pub static DELETE_BACKUP: &str = "delete from backups where id = ?";

pub static INSERT_REPORT: &str = "insert into reports(board, reporter, offender, postnum, comment, timestamp, date) values (?,?,?,?,?,?,?)";
